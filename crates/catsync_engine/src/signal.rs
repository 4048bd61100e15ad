//! Stop signal shared by the engine's threads.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A one-shot flag that timer loops can sleep on.
#[derive(Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    /// Creates an unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal and wakes every waiter.
    pub fn trigger(&self) {
        *self.stopped.lock() = true;
        self.changed.notify_all();
    }

    /// Returns true once triggered.
    pub fn is_set(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleeps up to `timeout`, returning early if the signal is triggered.
    ///
    /// Returns true if the signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.changed.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_times_out_when_unset() {
        let signal = StopSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn trigger_wakes_waiters() {
        let signal = Arc::new(StopSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                let start = Instant::now();
                let stopped = signal.wait_timeout(Duration::from_secs(10));
                (stopped, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        signal.trigger();
        let (stopped, waited) = waiter.join().unwrap();
        assert!(stopped);
        assert!(waited < Duration::from_secs(5));
        assert!(signal.is_set());
    }
}
