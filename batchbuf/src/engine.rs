//! Shared buffering engine
//!
//! [`Core`] owns the pending set of a buffer and implements everything the
//! stash and the spooler have in common: insertion with the count
//! watermark, manual and periodic flushes, clearing and closing.
//!
//! # Locking
//!
//! One mutex guards the pending set and the closed flag. Every mutation,
//! including "swap the pending set for an empty one", happens inside it, so
//! a batch is removed exactly once. Handlers are called after the lock is
//! released; producers are never blocked by a delivery they did not trigger.

use parking_lot::Mutex;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, trace, warn};

use crate::config::ClosePolicy;
use crate::error::{panic_message, BufferError, ErrorSink, FlushFailure, FlushTrigger};
use crate::handler::Handler;
use crate::pending::PendingSet;
use crate::timer::Ticker;

/// Name of the ticker threads
pub(crate) const TICKER_THREAD_NAME: &str = "batchbuf-ticker";

struct State<P> {
    pending: P,
    closed: bool,
}

pub(crate) struct Core<P: PendingSet> {
    state: Mutex<State<P>>,
    limit: AtomicUsize,
    handler: Handler<P::Item>,
    sink: ErrorSink,
    close_policy: ClosePolicy,
    /// Runtime that drives async handlers on the ticker thread
    runtime: Option<tokio::runtime::Handle>,
    /// Buffer flavor, for log messages
    kind: &'static str,
}

impl<P: PendingSet> Core<P> {
    pub(crate) fn new(
        kind: &'static str,
        pending: P,
        handler: Handler<P::Item>,
        limit: usize,
        close_policy: ClosePolicy,
        sink: ErrorSink,
    ) -> Self {
        Self {
            state: Mutex::new(State {
                pending,
                closed: false,
            }),
            limit: AtomicUsize::new(limit),
            handler,
            sink,
            close_policy,
            runtime: tokio::runtime::Handle::try_current().ok(),
            kind,
        }
    }

    // ------------------------------------------------------------------
    // Inspection and configuration
    // ------------------------------------------------------------------

    pub(crate) fn count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    pub(crate) fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Release);
    }

    /// Run `f` on the pending set under the lock, unless closed
    pub(crate) fn with_pending<R>(&self, f: impl FnOnce(&mut P) -> R) -> Option<R> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        Some(f(&mut state.pending))
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Insert an item and return the batch to deliver if the limit was hit
    fn insert(&self, item: P::Item) -> Result<Option<Vec<P::Item>>, BufferError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BufferError::Closed);
        }
        state.pending.insert(item);

        let limit = self.limit();
        if limit > 0 && state.pending.len() >= limit {
            Ok(Some(state.pending.take_all()))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn put(&self, item: P::Item) -> Result<(), BufferError> {
        if let Some(batch) = self.insert(item)? {
            self.deliver_in_background(batch, FlushTrigger::Limit);
        }
        Ok(())
    }

    pub(crate) async fn put_async<C>(&self, item: P::Item, cancel: C) -> Result<(), BufferError>
    where
        C: Future<Output = ()>,
    {
        let Some(batch) = self.insert(item)? else {
            return Ok(());
        };

        let items = batch.len();
        debug!(kind = self.kind, items, trigger = %FlushTrigger::Limit, "flush");
        let delivery = AssertUnwindSafe(self.handler.call(batch)).catch_unwind();
        tokio::select! {
            biased;
            () = cancel => {
                warn!(kind = self.kind, items, "limit flush cancelled, batch dropped");
                Err(BufferError::Cancelled)
            }
            outcome = delivery => {
                let error = match outcome {
                    Ok(Ok(())) => return Ok(()),
                    Ok(Err(e)) => BufferError::Handler(e),
                    Err(payload) => BufferError::HandlerPanicked(panic_message(payload.as_ref())),
                };
                self.report(FlushTrigger::Limit, items, error);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Flushing
    // ------------------------------------------------------------------

    fn take_batch(&self) -> Result<Vec<P::Item>, BufferError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BufferError::Closed);
        }
        Ok(state.pending.take_all())
    }

    /// Deliver everything pending and wait for the handler
    pub(crate) fn flush(&self) -> Result<usize, BufferError> {
        let batch = self.take_batch()?;
        if batch.is_empty() {
            return Ok(0);
        }

        let items = batch.len();
        debug!(kind = self.kind, items, trigger = %FlushTrigger::Manual, "flush");
        self.handler
            .call_blocking(batch, self.runtime.as_ref())
            .map_err(BufferError::Handler)?;
        Ok(items)
    }

    pub(crate) async fn flush_async<C>(&self, cancel: C) -> Result<usize, BufferError>
    where
        C: Future<Output = ()>,
    {
        let batch = self.take_batch()?;
        if batch.is_empty() {
            return Ok(0);
        }

        let items = batch.len();
        debug!(kind = self.kind, items, trigger = %FlushTrigger::Manual, "flush");
        tokio::select! {
            biased;
            () = cancel => {
                warn!(kind = self.kind, items, "flush cancelled, batch dropped");
                Err(BufferError::Cancelled)
            }
            result = self.handler.call(batch) => {
                result.map_err(BufferError::Handler)?;
                Ok(items)
            }
        }
    }

    /// Periodic flush; returns `false` once the buffer is closed
    pub(crate) fn tick(&self) -> bool {
        let batch = match self.take_batch() {
            Ok(batch) => batch,
            Err(_) => return false,
        };
        if batch.is_empty() {
            trace!(kind = self.kind, "tick with nothing pending");
            return true;
        }
        self.deliver_in_background(batch, FlushTrigger::Timer);
        true
    }

    /// Deliver a batch nobody is waiting for, reporting failures to the sink
    fn deliver_in_background(&self, batch: Vec<P::Item>, trigger: FlushTrigger) {
        let items = batch.len();
        debug!(kind = self.kind, items, %trigger, "flush");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.handler.call_blocking(batch, self.runtime.as_ref())
        }));
        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => BufferError::Handler(e),
            Err(payload) => BufferError::HandlerPanicked(panic_message(payload.as_ref())),
        };
        self.report(trigger, items, error);
    }

    pub(crate) fn report(&self, trigger: FlushTrigger, items: usize, error: BufferError) {
        let failure = FlushFailure {
            trigger,
            items,
            error,
        };
        if panic::catch_unwind(AssertUnwindSafe(|| (self.sink)(&failure))).is_err() {
            warn!(kind = self.kind, "error sink panicked while reporting: {failure}");
        }
    }

    // ------------------------------------------------------------------
    // Clearing and closing
    // ------------------------------------------------------------------

    /// Drop everything pending without delivering it
    pub(crate) fn clear(&self) -> Result<usize, BufferError> {
        let dropped = self.take_batch()?;
        if !dropped.is_empty() {
            debug!(kind = self.kind, items = dropped.len(), "pending items discarded");
        }
        Ok(dropped.len())
    }

    /// Mark the buffer closed and apply the close policy
    ///
    /// Returns the pending items when the policy says to deliver them; the
    /// caller decides how failures are surfaced. Closing twice yields an
    /// empty batch.
    fn seal(&self) -> Vec<P::Item> {
        let remaining = {
            let mut state = self.state.lock();
            if state.closed {
                return Vec::new();
            }
            state.closed = true;
            state.pending.take_all()
        };

        match self.close_policy {
            ClosePolicy::Flush => remaining,
            ClosePolicy::Discard => {
                if !remaining.is_empty() {
                    warn!(
                        kind = self.kind,
                        items = remaining.len(),
                        "closing with pending items, discarding them"
                    );
                }
                Vec::new()
            }
        }
    }

    pub(crate) fn close(&self) -> Result<(), BufferError> {
        let batch = self.seal();
        if batch.is_empty() {
            return Ok(());
        }
        debug!(kind = self.kind, items = batch.len(), trigger = %FlushTrigger::Close, "flush");
        self.handler
            .call_blocking(batch, self.runtime.as_ref())
            .map_err(BufferError::Handler)
    }

    /// Close from a destructor: never panics, failures go to the sink
    pub(crate) fn close_quietly(&self) {
        let batch = self.seal();
        if !batch.is_empty() {
            self.deliver_in_background(batch, FlushTrigger::Close);
        }
    }
}

/// Start the ticker that flushes `core` every `period`
///
/// The ticker holds a weak reference, so it winds down on its own once the
/// buffer is gone or closed.
pub(crate) fn start_ticker<P: PendingSet>(
    core: &Arc<Core<P>>,
    period: Duration,
) -> Result<Ticker, BufferError> {
    let weak: Weak<Core<P>> = Arc::downgrade(core);
    let ticker = Ticker::spawn(TICKER_THREAD_NAME, period, move || {
        weak.upgrade().is_some_and(|core| core.tick())
    })?;
    Ok(ticker)
}
