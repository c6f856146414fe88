//! Integration tests for Stash

use batchbuf::{BufferConfig, BufferError, ClosePolicy, FlushFailure, FlushTrigger, Handler, Stash};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

const LONG: Duration = Duration::from_secs(3600);

type Batches = Arc<Mutex<Vec<Vec<&'static str>>>>;

fn recording_handler() -> (Handler<&'static str>, Batches) {
    let batches: Batches = Arc::new(Mutex::new(Vec::new()));
    let batches_clone = Arc::clone(&batches);
    let handler = Handler::sync(move |batch: Vec<&'static str>| {
        batches_clone.lock().push(batch);
        Ok(())
    });
    (handler, batches)
}

#[test]
fn test_limit_triggers_flush() {
    let (handler, batches) = recording_handler();
    let stash = Stash::new(handler, BufferConfig::new(LONG, 4)).unwrap();

    stash.put("A").unwrap();
    stash.put("B").unwrap();
    stash.put("C").unwrap();
    assert_eq!(stash.count(), 3);
    assert!(batches.lock().is_empty());

    stash.put("D").unwrap();
    assert!(stash.is_empty());
    assert_eq!(*batches.lock(), vec![vec!["A", "B", "C", "D"]]);
}

#[test]
fn test_discard_never_calls_handler() {
    let (handler, batches) = recording_handler();
    let stash = Stash::new(handler, BufferConfig::new(LONG, 0)).unwrap();

    for item in ["A", "B", "C", "D", "E"] {
        stash.put(item).unwrap();
    }
    assert_eq!(stash.discard().unwrap(), 5);
    assert!(stash.is_empty());
    assert_eq!(stash.flush().unwrap(), 0);
    assert!(batches.lock().is_empty());
}

#[test]
fn test_flush_empty_is_noop() {
    let (handler, batches) = recording_handler();
    let stash = Stash::new(handler, BufferConfig::new(LONG, 0)).unwrap();

    assert_eq!(stash.flush().unwrap(), 0);
    assert_eq!(stash.flush().unwrap(), 0);
    assert_eq!(stash.count(), 0);
    assert!(batches.lock().is_empty());
}

#[test]
fn test_manual_flush_keeps_order() {
    let (handler, batches) = recording_handler();
    let stash = Stash::new(handler, BufferConfig::new(LONG, 0)).unwrap();

    stash.put("A").unwrap();
    stash.put("B").unwrap();
    stash.put("C").unwrap();
    assert_eq!(stash.flush().unwrap(), 3);
    assert_eq!(*batches.lock(), vec![vec!["A", "B", "C"]]);
}

#[test]
fn test_lowering_limit_flushes_on_next_put() {
    let (handler, batches) = recording_handler();
    let stash = Stash::new(handler, BufferConfig::new(LONG, 0)).unwrap();

    for item in ["A", "B", "C", "D", "E"] {
        stash.put(item).unwrap();
    }
    stash.set_limit(2);
    assert_eq!(stash.limit(), 2);
    // Changing the limit alone does not flush
    assert_eq!(stash.count(), 5);

    stash.put("F").unwrap();
    assert!(stash.is_empty());
    assert_eq!(*batches.lock(), vec![vec!["A", "B", "C", "D", "E", "F"]]);
}

#[test]
fn test_period_triggers_flush() {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let stash = Stash::new(
        Handler::sync(move |batch: Vec<&'static str>| {
            let _ = tx.lock().send(batch);
            Ok(())
        }),
        BufferConfig::new(LONG, 0),
    )
    .unwrap();

    stash.put("A").unwrap();
    stash.put("B").unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    stash.set_period(Duration::from_millis(10)).unwrap();
    assert_eq!(stash.period(), Duration::from_millis(10));

    let batch = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(batch, vec!["A", "B"]);
    assert!(stash.is_empty());
}

#[test]
fn test_take_does_not_trigger_flush() {
    let (handler, batches) = recording_handler();
    let stash = Stash::new(handler, BufferConfig::new(LONG, 3)).unwrap();

    stash.put("A").unwrap();
    stash.put("B").unwrap();
    assert_eq!(stash.try_take_at(0), Some("A"));
    stash.put("C").unwrap();
    assert_eq!(stash.count(), 2);
    assert!(batches.lock().is_empty());

    stash.put("D").unwrap();
    assert_eq!(*batches.lock(), vec![vec!["B", "C", "D"]]);
}

#[test]
fn test_invalid_period() {
    let (handler, _) = recording_handler();
    let result = Stash::new(handler, BufferConfig::new(Duration::ZERO, 0));
    assert!(matches!(result, Err(BufferError::InvalidPeriod)));

    let (handler, _) = recording_handler();
    let stash = Stash::new(handler, BufferConfig::new(LONG, 0)).unwrap();
    assert!(matches!(
        stash.set_period(Duration::ZERO),
        Err(BufferError::InvalidPeriod)
    ));
    assert_eq!(stash.period(), LONG);
}

#[test]
fn test_manual_flush_propagates_handler_error() {
    let stash = Stash::new(
        Handler::sync(|_batch: Vec<u32>| Err("downstream unavailable".into())),
        BufferConfig::new(LONG, 0),
    )
    .unwrap();

    stash.put(1).unwrap();
    let err = stash.flush().unwrap_err();
    assert!(matches!(err, BufferError::Handler(ref e) if e.to_string() == "downstream unavailable"));
    // The batch was removed before the handler ran; nothing is re-queued
    assert!(stash.is_empty());
}

#[test]
fn test_background_failures_reach_sink() {
    let failures: Arc<Mutex<Vec<(FlushTrigger, usize, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let failures_clone = Arc::clone(&failures);
    let sink = Arc::new(move |failure: &FlushFailure| {
        failures_clone
            .lock()
            .push((failure.trigger, failure.items, failure.error.to_string()));
    });

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = Arc::clone(&calls);
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let stash = Stash::with_error_sink(
        Handler::sync(move |batch: Vec<u32>| {
            let call = calls_clone.fetch_add(1, Ordering::SeqCst);
            match call {
                0 => Err("rejected".into()),
                1 => panic!("handler blew up"),
                _ => {
                    let _ = tx.lock().send(batch);
                    Ok(())
                }
            }
        }),
        BufferConfig::new(LONG, 2),
        sink,
    )
    .unwrap();

    // First limit flush fails, put still succeeds
    stash.put(1).unwrap();
    stash.put(2).unwrap();
    // Second limit flush panics, put still succeeds
    stash.put(3).unwrap();
    stash.put(4).unwrap();
    assert!(stash.is_empty());

    // The ticker keeps working after failures
    stash.put(5).unwrap();
    stash.set_period(Duration::from_millis(10)).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), vec![5]);

    let failures = failures.lock();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].0, FlushTrigger::Limit);
    assert_eq!(failures[0].1, 2);
    assert_eq!(failures[0].2, "flush handler failed: rejected");
    assert_eq!(failures[1].0, FlushTrigger::Limit);
    assert_eq!(failures[1].2, "flush handler panicked: handler blew up");
}

#[test]
fn test_close_flushes_by_default() {
    let (handler, batches) = recording_handler();
    let stash = Stash::new(handler, BufferConfig::new(LONG, 0)).unwrap();

    stash.put("A").unwrap();
    stash.put("B").unwrap();
    stash.close().unwrap();

    assert_eq!(*batches.lock(), vec![vec!["A", "B"]]);
    assert!(matches!(stash.put("C"), Err(BufferError::Closed)));
    assert!(matches!(stash.flush(), Err(BufferError::Closed)));
    assert!(matches!(stash.discard(), Err(BufferError::Closed)));
    stash.close().unwrap();
}

#[test]
fn test_close_discard_policy() {
    let (handler, batches) = recording_handler();
    let stash = Stash::new(
        handler,
        BufferConfig::new(LONG, 0).with_close_policy(ClosePolicy::Discard),
    )
    .unwrap();

    stash.put("A").unwrap();
    stash.close().unwrap();
    assert!(batches.lock().is_empty());
    assert!(stash.is_empty());
}

#[test]
fn test_drop_flushes_pending() {
    let (handler, batches) = recording_handler();
    {
        let stash = Stash::new(handler, BufferConfig::new(LONG, 0)).unwrap();
        stash.put("A").unwrap();
    }
    assert_eq!(*batches.lock(), vec![vec!["A"]]);
}

#[tokio::test]
async fn test_flush_async_with_async_handler() {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let delivered_clone = Arc::clone(&delivered);
    let stash = Stash::new(
        Handler::from_async(move |batch: Vec<u32>| {
            let delivered = Arc::clone(&delivered_clone);
            async move {
                tokio::task::yield_now().await;
                delivered.lock().extend(batch);
                Ok(())
            }
        }),
        BufferConfig::new(LONG, 0),
    )
    .unwrap();

    stash.put_async(1).await.unwrap();
    stash.put_async(2).await.unwrap();
    assert_eq!(stash.flush_async().await.unwrap(), 2);
    assert_eq!(*delivered.lock(), vec![1, 2]);
    assert_eq!(stash.flush_async().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancelled_flush_drops_batch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = Arc::clone(&calls);
    let stash = Stash::new(
        Handler::from_async(move |_batch: Vec<u32>| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }),
        BufferConfig::new(LONG, 0),
    )
    .unwrap();

    stash.put(1).unwrap();
    stash.put(2).unwrap();

    let result = stash.flush_async_until(std::future::ready(())).await;
    assert!(matches!(result, Err(BufferError::Cancelled)));
    assert!(stash.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_put_async_limit_flush() {
    let (handler, batches) = recording_handler();
    let stash = Stash::new(handler, BufferConfig::new(LONG, 2)).unwrap();

    stash.put_async("A").await.unwrap();
    stash.put_async("B").await.unwrap();
    assert!(stash.is_empty());

    stash.put_async("C").await.unwrap();
    let result = stash
        .put_async_until("D", std::future::ready(()))
        .await;
    assert!(matches!(result, Err(BufferError::Cancelled)));
    assert!(stash.is_empty());
    assert_eq!(*batches.lock(), vec![vec!["A", "B"]]);
}

fn sleeping_handler(delivered: &Arc<Mutex<Vec<u32>>>) -> Handler<u32> {
    let delivered = Arc::clone(delivered);
    Handler::from_async(move |batch: Vec<u32>| {
        let delivered = Arc::clone(&delivered);
        async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            delivered.lock().extend(batch);
            Ok(())
        }
    })
}

#[tokio::test]
async fn test_sync_calls_with_timer_handler_in_current_thread_runtime() {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let stash = Stash::new(sleeping_handler(&delivered), BufferConfig::new(LONG, 1)).unwrap();

    // Limit flush inside a sync put
    stash.put(1).unwrap();
    assert_eq!(*delivered.lock(), vec![1]);

    stash.set_limit(0);
    stash.put(2).unwrap();
    assert_eq!(stash.flush().unwrap(), 1);
    stash.put(3).unwrap();
    drop(stash);
    assert_eq!(*delivered.lock(), vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_calls_with_timer_handler_in_multi_thread_runtime() {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let stash = Stash::new(sleeping_handler(&delivered), BufferConfig::new(LONG, 2)).unwrap();

    stash.put(1).unwrap();
    stash.put(2).unwrap();
    stash.put(3).unwrap();
    stash.close().unwrap();
    assert_eq!(*delivered.lock(), vec![1, 2, 3]);
}

async fn ticker_delivers_async_handler_batch() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let stash = Stash::new(
        Handler::from_async(move |batch: Vec<u32>| {
            let tx = tx.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                let _ = tx.send(batch);
                Ok(())
            }
        }),
        BufferConfig::new(Duration::from_millis(10), 0),
    )
    .unwrap();

    stash.put(4).unwrap();
    stash.put(5).unwrap();
    let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap();
    assert_eq!(batch, Some(vec![4, 5]));
    stash.close().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ticker_runs_async_handler_on_captured_runtime() {
    ticker_delivers_async_handler_batch().await;
}

#[tokio::test]
async fn test_ticker_runs_async_handler_built_in_current_thread_runtime() {
    ticker_delivers_async_handler_batch().await;
}
