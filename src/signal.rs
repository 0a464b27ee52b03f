//! One-shot exit signal shared by every watcher of a PID.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Fired at most once by the dispatch loop, read by any number of watchers.
///
/// Reads go through the atomic flag and never lock. The mutex/condvar pair
/// only exists so [`wait_timeout`](Self::wait_timeout) can block.
#[derive(Debug, Default)]
pub struct ExitSignal {
    fired: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl ExitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the process as exited and wakes all waiters. Idempotent.
    pub fn fire(&self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Blocks until fired or `timeout` elapses. Returns whether it fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !self.has_fired() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_unfired() {
        let s = ExitSignal::new();
        assert!(!s.has_fired());
        assert!(!s.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn fire_is_idempotent() {
        let s = ExitSignal::new();
        s.fire();
        s.fire();
        assert!(s.has_fired());
        assert!(s.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn fire_wakes_every_waiter() {
        let s = Arc::new(ExitSignal::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || s.wait_timeout(Duration::from_secs(5)))
            })
            .collect();

        std::thread::sleep(Duration::from_millis(20));
        s.fire();

        for w in waiters {
            assert!(w.join().unwrap());
        }
    }
}
