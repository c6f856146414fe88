//! Ordered buffer with manual take
//!
//! A [`Stash`] keeps items in insertion order and flushes them in batches
//! like any other buffer, but also lets the owner pull single items out
//! before the next flush: the oldest one, or one at a signed position.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use batchbuf::{BufferConfig, Handler, Stash};
//!
//! let stash = Stash::new(
//!     Handler::sync(|batch: Vec<&'static str>| {
//!         println!("delivering {batch:?}");
//!         Ok(())
//!     }),
//!     BufferConfig::new(Duration::from_secs(60), 0),
//! )
//! .unwrap();
//!
//! stash.put("a").unwrap();
//! stash.put("b").unwrap();
//! stash.put("c").unwrap();
//!
//! assert_eq!(stash.try_take(), Some("a"));
//! assert_eq!(stash.try_take_at(-1), Some("c"));
//! assert_eq!(stash.flush().unwrap(), 1);
//! assert!(stash.is_empty());
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::{validate_period, BufferConfig};
use crate::engine::{start_ticker, Core};
use crate::error::{log_sink, BufferError, ErrorSink};
use crate::handler::Handler;
use crate::pending::OrderedSet;
use crate::timer::Ticker;

/// FIFO buffer with batch flush and single-item take
///
/// All methods take `&self`; share the stash between threads with an `Arc`.
/// Dropping the stash closes it.
pub struct Stash<T: Send + 'static> {
    core: Arc<Core<OrderedSet<T>>>,
    ticker: Ticker,
}

impl<T: Send + 'static> Stash<T> {
    /// Create a stash and start its ticker
    ///
    /// Background flush failures are logged.
    ///
    /// # Errors
    /// Returns `InvalidPeriod` for a zero period, `Spawn` if the ticker
    /// thread cannot be started
    pub fn new(handler: Handler<T>, config: BufferConfig) -> Result<Self, BufferError> {
        Self::with_error_sink(handler, config, log_sink())
    }

    /// Create a stash that reports background flush failures to `sink`
    ///
    /// # Errors
    /// See [`new`](Self::new)
    pub fn with_error_sink(
        handler: Handler<T>,
        config: BufferConfig,
        sink: ErrorSink,
    ) -> Result<Self, BufferError> {
        config.validate()?;
        if config.distinct {
            warn!("stash ignores distinct mode");
        }

        let core = Arc::new(Core::new(
            "stash",
            OrderedSet::new(),
            handler,
            config.limit,
            config.close_policy,
            sink,
        ));
        let ticker = start_ticker(&core, config.period)?;
        Ok(Self { core, ticker })
    }

    /// Append an item, flushing on this thread if the limit is reached
    ///
    /// # Errors
    /// Returns `Closed` after [`close`](Self::close)
    pub fn put(&self, item: T) -> Result<(), BufferError> {
        self.core.put(item)
    }

    /// Append an item, awaiting the flush if the limit is reached
    ///
    /// # Errors
    /// Returns `Closed` after [`close`](Self::close)
    pub async fn put_async(&self, item: T) -> Result<(), BufferError> {
        self.core.put_async(item, std::future::pending::<()>()).await
    }

    /// Like [`put_async`](Self::put_async), giving up on a triggered flush
    /// when `cancel` completes first
    ///
    /// # Errors
    /// Returns `Cancelled` if the flush was abandoned; its batch is lost
    pub async fn put_async_until<C>(&self, item: T, cancel: C) -> Result<(), BufferError>
    where
        C: Future<Output = ()>,
    {
        self.core.put_async(item, cancel).await
    }

    /// Deliver all pending items and wait for the handler
    ///
    /// Returns the number of delivered items; an empty stash is not
    /// delivered at all.
    ///
    /// # Errors
    /// Returns `Handler` if the handler failed, `Closed` after close
    pub fn flush(&self) -> Result<usize, BufferError> {
        self.core.flush()
    }

    /// Async version of [`flush`](Self::flush)
    ///
    /// # Errors
    /// See [`flush`](Self::flush)
    pub async fn flush_async(&self) -> Result<usize, BufferError> {
        self.core.flush_async(std::future::pending::<()>()).await
    }

    /// Flush, abandoning the delivery if `cancel` completes first
    ///
    /// The batch is removed before the handler runs; a cancelled flush does
    /// not put it back.
    ///
    /// # Errors
    /// Returns `Cancelled` when abandoned, otherwise see [`flush`](Self::flush)
    pub async fn flush_async_until<C>(&self, cancel: C) -> Result<usize, BufferError>
    where
        C: Future<Output = ()>,
    {
        self.core.flush_async(cancel).await
    }

    /// Drop all pending items without calling the handler
    ///
    /// Returns the number of dropped items.
    ///
    /// # Errors
    /// Returns `Closed` after close
    pub fn discard(&self) -> Result<usize, BufferError> {
        self.core.clear()
    }

    /// Remove and return the oldest pending item
    #[must_use]
    pub fn try_take(&self) -> Option<T> {
        self.core.with_pending(OrderedSet::take_front).flatten()
    }

    /// Remove and return the item at `position`
    ///
    /// `0` is the oldest item, `1` the next; `-1` is the newest, `-2` the
    /// one before it. Out-of-range positions return `None`.
    #[must_use]
    pub fn try_take_at(&self, position: isize) -> Option<T> {
        self.core
            .with_pending(|pending| pending.take_at(position))
            .flatten()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.core.count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.ticker.period()
    }

    /// Change the flush period, restarting the current wait
    ///
    /// # Errors
    /// Returns `InvalidPeriod` for zero, `Closed` after close
    pub fn set_period(&self, period: Duration) -> Result<(), BufferError> {
        validate_period(period)?;
        if self.core.is_closed() {
            return Err(BufferError::Closed);
        }
        self.ticker.reschedule(period);
        Ok(())
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.core.limit()
    }

    /// Change the count limit; `0` disables it. Applies from the next `put`.
    pub fn set_limit(&self, limit: usize) {
        self.core.set_limit(limit);
    }

    /// Stop the ticker and close the stash
    ///
    /// Pending items are delivered or dropped according to the close
    /// policy. Later mutating calls fail with `Closed`. Closing twice is a
    /// no-op.
    ///
    /// # Errors
    /// Returns `Handler` if delivering the remaining items failed
    pub fn close(&self) -> Result<(), BufferError> {
        self.ticker.stop();
        self.core.close()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl<T: Send + 'static> Drop for Stash<T> {
    fn drop(&mut self) {
        self.ticker.stop();
        self.core.close_quietly();
    }
}

impl<T: Send + 'static> std::fmt::Debug for Stash<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stash")
            .field("count", &self.count())
            .field("limit", &self.limit())
            .field("period", &self.period())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
