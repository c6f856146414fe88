//! Flush handlers
//!
//! A handler receives every non-empty batch removed from a buffer. It can be
//! a plain function or one returning a future; either way the buffer waits
//! for it to finish before the flush counts as done.

use std::fmt;
use std::future::Future;
use std::panic;
use std::sync::Arc;
use std::thread;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::RuntimeFlavor;

use crate::error::HandlerResult;

/// Name of the threads that run async handlers for blocked runtime threads
const HELPER_THREAD_NAME: &str = "batchbuf-handler";

type SyncFn<T> = dyn Fn(Vec<T>) -> HandlerResult + Send + Sync;
type AsyncFn<T> = dyn Fn(Vec<T>) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// Receiver of flushed batches
pub enum Handler<T> {
    Sync(Arc<SyncFn<T>>),
    Async(Arc<AsyncFn<T>>),
}

impl<T> Handler<T> {
    /// Wrap a blocking handler
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Vec<T>) -> HandlerResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap a handler that returns a future
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Async(Arc::new(move |batch| f(batch).boxed()))
    }

    /// Run the handler to completion on the current thread
    ///
    /// Async handlers are driven by the runtime the caller is in, by
    /// `runtime` when the caller is outside any runtime, or by a private
    /// current-thread runtime. A current-thread runtime cannot make progress
    /// while its only thread is blocked here, so it is never used to drive
    /// the handler; a helper thread with its own runtime does it instead.
    pub(crate) fn call_blocking(
        &self,
        batch: Vec<T>,
        runtime: Option<&tokio::runtime::Handle>,
    ) -> HandlerResult {
        match self {
            Self::Sync(f) => f(batch),
            Self::Async(f) => block_on(f(batch), runtime),
        }
    }

    pub(crate) async fn call(&self, batch: Vec<T>) -> HandlerResult {
        match self {
            Self::Sync(f) => f(batch),
            Self::Async(f) => f(batch).await,
        }
    }
}

fn block_on(
    fut: BoxFuture<'static, HandlerResult>,
    runtime: Option<&tokio::runtime::Handle>,
) -> HandlerResult {
    match tokio::runtime::Handle::try_current() {
        Ok(current) if current.runtime_flavor() == RuntimeFlavor::CurrentThread => {
            block_on_helper_thread(fut)
        }
        Ok(current) => tokio::task::block_in_place(|| current.block_on(fut)),
        Err(_) => match runtime {
            Some(rt) if rt.runtime_flavor() != RuntimeFlavor::CurrentThread => rt.block_on(fut),
            _ => block_on_private(fut),
        },
    }
}

/// Drive `fut` on a fresh current-thread runtime owned by this thread
fn block_on_private(fut: BoxFuture<'static, HandlerResult>) -> HandlerResult {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(fut)
}

/// Drive `fut` on a short-lived thread and wait for it
///
/// A panic in the handler is re-raised on the calling thread.
fn block_on_helper_thread(fut: BoxFuture<'static, HandlerResult>) -> HandlerResult {
    thread::scope(|scope| -> HandlerResult {
        let helper = thread::Builder::new()
            .name(HELPER_THREAD_NAME.to_string())
            .spawn_scoped(scope, move || block_on_private(fut))?;
        helper
            .join()
            .unwrap_or_else(|payload| panic::resume_unwind(payload))
    })
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(Arc::clone(f)),
            Self::Async(f) => Self::Async(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Handler::Sync"),
            Self::Async(_) => f.write_str("Handler::Async"),
        }
    }
}
