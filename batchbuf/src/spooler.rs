//! Aggregating buffer with optional coalescing
//!
//! A [`Spooler`] accumulates items and hands them to its handler in batches.
//! In distinct mode, putting an item equal to one already pending replaces
//! it: the batch carries the latest value once. Equality is the item type's
//! `Eq`/`Hash`; wrap values in [`Keyed`](crate::Keyed) to coalesce by a key.
//! Items without `Eq`/`Hash`, such as floats, go through
//! [`Spooler::accumulating`].
//!
//! Batch order is unspecified.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{validate_period, BufferConfig};
use crate::engine::{start_ticker, Core};
use crate::error::{log_sink, BufferError, ErrorSink};
use crate::handler::Handler;
use crate::pending::SpoolSet;
use crate::timer::Ticker;

/// Accumulate-and-flush buffer
///
/// All methods take `&self`; share the spooler between threads with an
/// `Arc`. Dropping the spooler closes it.
pub struct Spooler<T: Send + 'static> {
    core: Arc<Core<SpoolSet<T>>>,
    ticker: Ticker,
    distinct: bool,
}

impl<T: Eq + Hash + Send + 'static> Spooler<T> {
    /// Create a spooler and start its ticker
    ///
    /// Distinct mode follows `config.distinct`. Item types without
    /// `Eq + Hash` use [`accumulating`](Self::accumulating) instead.
    ///
    /// # Errors
    /// Returns `InvalidPeriod` for a zero period, `Spawn` if the ticker
    /// thread cannot be started
    pub fn new(handler: Handler<T>, config: BufferConfig) -> Result<Self, BufferError> {
        Self::with_error_sink(handler, config, log_sink())
    }

    /// Create a spooler that reports background flush failures to `sink`
    ///
    /// # Errors
    /// See [`new`](Self::new)
    pub fn with_error_sink(
        handler: Handler<T>,
        config: BufferConfig,
        sink: ErrorSink,
    ) -> Result<Self, BufferError> {
        let pending = if config.distinct {
            SpoolSet::distinct()
        } else {
            SpoolSet::accumulate()
        };
        Self::build(pending, handler, &config, sink)
    }
}

impl<T: Send + 'static> Spooler<T> {
    /// Create a spooler that keeps every item, for any item type
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `config.distinct` is set, otherwise see
    /// [`new`](Self::new)
    pub fn accumulating(handler: Handler<T>, config: BufferConfig) -> Result<Self, BufferError> {
        Self::accumulating_with_error_sink(handler, config, log_sink())
    }

    /// [`accumulating`](Self::accumulating) with a custom error sink
    ///
    /// # Errors
    /// See [`accumulating`](Self::accumulating)
    pub fn accumulating_with_error_sink(
        handler: Handler<T>,
        config: BufferConfig,
        sink: ErrorSink,
    ) -> Result<Self, BufferError> {
        if config.distinct {
            return Err(BufferError::InvalidConfig(
                "distinct mode needs an Eq + Hash item type, use Spooler::new".to_string(),
            ));
        }
        Self::build(SpoolSet::accumulate(), handler, &config, sink)
    }

    fn build(
        pending: SpoolSet<T>,
        handler: Handler<T>,
        config: &BufferConfig,
        sink: ErrorSink,
    ) -> Result<Self, BufferError> {
        config.validate()?;

        let distinct = pending.is_distinct();
        let core = Arc::new(Core::new(
            "spooler",
            pending,
            handler,
            config.limit,
            config.close_policy,
            sink,
        ));
        let ticker = start_ticker(&core, config.period)?;
        Ok(Self {
            core,
            ticker,
            distinct,
        })
    }

    /// Add an item, flushing on this thread if the limit is reached
    ///
    /// In distinct mode an equal pending item is replaced and the count
    /// stays the same.
    ///
    /// # Errors
    /// Returns `Closed` after [`close`](Self::close)
    pub fn put(&self, item: T) -> Result<(), BufferError> {
        self.core.put(item)
    }

    /// Add an item, awaiting the flush if the limit is reached
    ///
    /// # Errors
    /// Returns `Closed` after [`close`](Self::close)
    pub async fn put_async(&self, item: T) -> Result<(), BufferError> {
        self.core.put_async(item, std::future::pending::<()>()).await
    }

    /// # Errors
    /// Returns `Cancelled` if a triggered flush was abandoned; its batch is
    /// lost
    pub async fn put_async_until<C>(&self, item: T, cancel: C) -> Result<(), BufferError>
    where
        C: Future<Output = ()>,
    {
        self.core.put_async(item, cancel).await
    }

    /// Deliver all pending items and wait for the handler
    ///
    /// # Errors
    /// Returns `Handler` if the handler failed, `Closed` after close
    pub fn flush(&self) -> Result<usize, BufferError> {
        self.core.flush()
    }

    /// # Errors
    /// See [`flush`](Self::flush)
    pub async fn flush_async(&self) -> Result<usize, BufferError> {
        self.core.flush_async(std::future::pending::<()>()).await
    }

    /// Flush, abandoning the delivery if `cancel` completes first
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
    /// # Errors
    /// Returns `Closed` after close
    pub fn clear(&self) -> Result<usize, BufferError> {
        self.core.clear()
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
    pub fn is_distinct(&self) -> bool {
        self.distinct
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

    pub fn set_limit(&self, limit: usize) {
        self.core.set_limit(limit);
    }

    /// Stop the ticker and close the spooler
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

impl<T: Send + 'static> Drop for Spooler<T> {
    fn drop(&mut self) {
        self.ticker.stop();
        self.core.close_quietly();
    }
}

impl<T: Send + 'static> std::fmt::Debug for Spooler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spooler")
            .field("count", &self.count())
            .field("distinct", &self.distinct)
            .field("limit", &self.limit())
            .field("period", &self.period())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Keyed;
    use parking_lot::Mutex;

    #[test]
    fn test_distinct_replaces_in_place() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let delivered_clone = Arc::clone(&delivered);
        let spooler = Spooler::new(
            Handler::sync(move |batch: Vec<Keyed<&'static str, u32>>| {
                delivered_clone.lock().extend(batch);
                Ok(())
            }),
            BufferConfig::new(Duration::from_secs(3600), 0).with_distinct(true),
        )
        .unwrap();
        assert!(spooler.is_distinct());

        spooler.put(Keyed::new("cpu", 1)).unwrap();
        spooler.put(Keyed::new("cpu", 2)).unwrap();
        spooler.put(Keyed::new("mem", 7)).unwrap();
        spooler.put(Keyed::new("cpu", 3)).unwrap();
        assert_eq!(spooler.count(), 2);

        assert_eq!(spooler.flush().unwrap(), 2);
        let mut values: Vec<(&str, u32)> = delivered
            .lock()
            .iter()
            .map(|item| (item.key, item.value))
            .collect();
        values.sort_unstable();
        assert_eq!(values, vec![("cpu", 3), ("mem", 7)]);
    }

    #[test]
    fn test_non_distinct_counts_duplicates() {
        let spooler = Spooler::new(
            Handler::sync(|_batch: Vec<u8>| Ok(())),
            BufferConfig::new(Duration::from_secs(3600), 0),
        )
        .unwrap();
        assert!(!spooler.is_distinct());

        for _ in 0..5 {
            spooler.put(9).unwrap();
        }
        assert_eq!(spooler.count(), 5);
        assert_eq!(spooler.clear().unwrap(), 5);
        assert!(spooler.is_empty());
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Reading {
        sensor: &'static str,
        celsius: f64,
    }

    #[test]
    fn test_accumulating_takes_items_without_hash() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let delivered_clone = Arc::clone(&delivered);
        let spooler = Spooler::accumulating(
            Handler::sync(move |batch: Vec<Reading>| {
                delivered_clone.lock().extend(batch);
                Ok(())
            }),
            BufferConfig::new(Duration::from_secs(3600), 3),
        )
        .unwrap();
        assert!(!spooler.is_distinct());

        let reading = Reading {
            sensor: "boiler",
            celsius: 71.5,
        };
        spooler.put(reading.clone()).unwrap();
        spooler.put(reading.clone()).unwrap();
        assert_eq!(spooler.count(), 2);
        spooler.put(reading.clone()).unwrap();

        assert!(spooler.is_empty());
        assert_eq!(*delivered.lock(), vec![reading.clone(), reading.clone(), reading]);
    }

    #[test]
    fn test_accumulating_rejects_distinct_config() {
        let result = Spooler::accumulating(
            Handler::sync(|_batch: Vec<f64>| Ok(())),
            BufferConfig::new(Duration::from_secs(3600), 0).with_distinct(true),
        );
        assert!(matches!(result, Err(BufferError::InvalidConfig(_))));
    }
}
