//! Restartable ticker
//!
//! A dedicated thread that calls a tick function every `period`. Changing
//! the period abandons the wait in progress and starts a fresh one with the
//! new value, so a shorter period takes effect right away instead of after
//! the old wait expires.
//!
//! # Wait protocol
//!
//! The thread sleeps on a condvar with a deadline. Every reschedule bumps a
//! generation counter and signals the condvar; the thread compares the
//! generation it started waiting with against the current one to tell a
//! reschedule from a spurious wakeup. The tick function runs with the
//! schedule lock released, so `reschedule` and `stop` never wait for a flush.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

struct TickState {
    period: Duration,
    generation: u64,
    stopped: bool,
}

struct Schedule {
    state: Mutex<TickState>,
    wake: Condvar,
}

/// Handle to a ticker thread
///
/// Dropping the handle stops the thread.
pub(crate) struct Ticker {
    schedule: Arc<Schedule>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Ticker {
    /// Start a ticker thread
    ///
    /// `on_tick` returns `false` to end the thread.
    pub(crate) fn spawn<F>(name: &str, period: Duration, on_tick: F) -> std::io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let schedule = Arc::new(Schedule {
            state: Mutex::new(TickState {
                period,
                generation: 0,
                stopped: false,
            }),
            wake: Condvar::new(),
        });

        let thread_schedule = Arc::clone(&schedule);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(&thread_schedule, on_tick))?;

        Ok(Self {
            schedule,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub(crate) fn period(&self) -> Duration {
        self.schedule.state.lock().period
    }

    /// Replace the period and restart the current wait with it
    pub(crate) fn reschedule(&self, period: Duration) {
        let mut state = self.schedule.state.lock();
        state.period = period;
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.schedule.wake.notify_all();
    }

    /// Stop the thread and wait for it to finish
    ///
    /// A tick in progress completes first. When called from the ticker
    /// thread itself (a handler closing its own buffer) the thread is
    /// detached instead of joined.
    pub(crate) fn stop(&self) {
        {
            let mut state = self.schedule.state.lock();
            state.stopped = true;
        }
        self.schedule.wake.notify_all();

        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            debug!("ticker stopped from its own thread, detaching");
            return;
        }
        if thread.join().is_err() {
            debug!("ticker thread ended with a panic");
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F>(schedule: &Schedule, mut on_tick: F)
where
    F: FnMut() -> bool,
{
    let mut state = schedule.state.lock();
    loop {
        if state.stopped {
            break;
        }

        let generation = state.generation;
        let deadline = Instant::now() + state.period;
        if !wait_until(schedule, &mut state, generation, deadline) {
            // Stopped or rescheduled; the loop head sorts out which.
            continue;
        }

        trace!("ticker fired");
        let keep_going = MutexGuard::unlocked(&mut state, &mut on_tick);
        if !keep_going {
            break;
        }
    }
    trace!("ticker thread exiting");
}

/// Sleep until `deadline`
///
/// Returns `true` when the deadline passed with the schedule unchanged.
fn wait_until(
    schedule: &Schedule,
    state: &mut MutexGuard<'_, TickState>,
    generation: u64,
    deadline: Instant,
) -> bool {
    loop {
        let timed_out = schedule.wake.wait_until(state, deadline).timed_out();
        if state.stopped || state.generation != generation {
            return false;
        }
        if timed_out || Instant::now() >= deadline {
            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn test_ticks_repeatedly() {
        let (tx, rx) = mpsc::channel();
        let ticker = Ticker::spawn("test-ticker", Duration::from_millis(5), move || {
            tx.send(()).is_ok()
        })
        .unwrap();

        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        ticker.stop();
    }

    #[test]
    fn test_reschedule_shortens_wait() {
        let (tx, rx) = mpsc::channel();
        let ticker = Ticker::spawn("test-ticker", Duration::from_secs(3600), move || {
            tx.send(()).is_ok()
        })
        .unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        ticker.reschedule(Duration::from_millis(5));
        assert_eq!(ticker.period(), Duration::from_millis(5));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_stop_prevents_further_ticks() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = Arc::clone(&ticks);
        let ticker = Ticker::spawn("test-ticker", Duration::from_millis(1), move || {
            ticks_clone.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        ticker.stop();
        let after_stop = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);

        // Stopping twice is harmless
        ticker.stop();
    }

    #[test]
    fn test_tick_returning_false_ends_thread() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = Arc::clone(&ticks);
        let ticker = Ticker::spawn("test-ticker", Duration::from_millis(1), move || {
            ticks_clone.fetch_add(1, Ordering::SeqCst);
            false
        })
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        ticker.stop();
    }
}
