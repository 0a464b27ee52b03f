//! Per-caller liveness handle.

use crate::caller::CallerInfo;
use crate::error::{Result, TrackerError};
use crate::signal::ExitSignal;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Vouches for one caller between attestation and credential release.
///
/// Created by [`Tracker::new_watcher`](crate::Tracker::new_watcher). Every
/// watcher of the same PID shares one exit signal, so an exit observed once
/// is seen by all of them.
///
/// # Lifecycle
///
/// 1. Create the watcher as soon as the caller PID is resolved.
/// 2. Run attestation and mint the credential.
/// 3. Call [`is_alive`](Self::is_alive) right before handing it over.
/// 4. [`close`](Self::close) when the request is done. A closed watcher
///    reports [`TrackerError::NotWatched`] forever after.
#[derive(Debug)]
pub struct Watcher {
    caller: CallerInfo,
    signal: Arc<ExitSignal>,
    closed: Mutex<bool>,
    safety_delay: Duration,
    backend: &'static str,
}

impl Watcher {
    pub(crate) fn new(
        caller: CallerInfo,
        signal: Arc<ExitSignal>,
        safety_delay: Duration,
        backend: &'static str,
    ) -> Self {
        Self {
            caller,
            signal,
            closed: Mutex::new(false),
            safety_delay,
            backend,
        }
    }

    /// Checks that no exit has been observed for the caller.
    ///
    /// Exit notification is asynchronous, so the answer is delayed by the
    /// configured safety delay to let in-flight exit events land first.
    /// `Ok(())` means "no exit observed as of this check", not a proof that
    /// the process keeps running afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::NotWatched`] if the watcher was closed, or
    /// [`TrackerError::CallerExited`] if the process exit was observed.
    pub fn is_alive(&self) -> Result<()> {
        if self.is_closed() {
            tracing::warn!(
                pid = self.caller.pid,
                backend = self.backend,
                "Caller is no longer being watched"
            );
            return Err(TrackerError::NotWatched {
                pid: self.caller.pid,
            });
        }

        std::thread::sleep(self.safety_delay);

        if self.signal.has_fired() {
            tracing::warn!(
                pid = self.caller.pid,
                uid = ?self.caller.uid,
                gid = ?self.caller.gid,
                backend = self.backend,
                "Caller exit detected"
            );
            return Err(TrackerError::CallerExited {
                pid: self.caller.pid,
                backend: self.backend,
            });
        }
        Ok(())
    }

    /// Stops vouching for the caller.
    ///
    /// The registry entry is left alone; it is reaped when the process exits.
    pub fn close(&self) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Blocks until the caller's exit is observed or `timeout` elapses.
    ///
    /// Returns `true` if the exit was observed. Ignores the closed flag and
    /// the safety delay.
    #[must_use]
    pub fn wait_for_exit(&self, timeout: Duration) -> bool {
        self.signal.wait_timeout(timeout)
    }

    /// The watched PID.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.caller.pid
    }

    /// The caller this watcher was created for.
    #[must_use]
    pub const fn caller(&self) -> &CallerInfo {
        &self.caller
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn watcher(delay: Duration) -> (Watcher, Arc<ExitSignal>) {
        let signal = Arc::new(ExitSignal::new());
        let w = Watcher::new(CallerInfo::new(42), Arc::clone(&signal), delay, "test");
        (w, signal)
    }

    #[test]
    fn alive_until_signal_fires() {
        let (w, signal) = watcher(Duration::ZERO);
        w.is_alive().unwrap();

        signal.fire();
        let err = w.is_alive().unwrap_err();
        assert!(matches!(
            err,
            TrackerError::CallerExited {
                pid: 42,
                backend: "test"
            }
        ));
    }

    #[test]
    fn closed_watcher_is_never_alive() {
        let (w, _signal) = watcher(Duration::ZERO);
        w.close();
        assert!(matches!(w.is_alive(), Err(TrackerError::NotWatched { pid: 42 })));
        assert!(matches!(w.is_alive(), Err(TrackerError::NotWatched { .. })));
    }

    #[test]
    fn closed_takes_precedence_over_exit() {
        let (w, signal) = watcher(Duration::ZERO);
        signal.fire();
        w.close();
        assert!(matches!(w.is_alive(), Err(TrackerError::NotWatched { .. })));
    }

    #[test]
    fn waits_safety_delay() {
        let delay = Duration::from_millis(30);
        let (w, _signal) = watcher(delay);
        let start = Instant::now();
        w.is_alive().unwrap();
        assert!(start.elapsed() >= delay);
    }

    #[test]
    fn closed_watcher_answers_without_delay() {
        let (w, _signal) = watcher(Duration::from_secs(10));
        w.close();
        let start = Instant::now();
        assert!(w.is_alive().is_err());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn accessors() {
        let (w, signal) = watcher(Duration::ZERO);
        assert_eq!(w.pid(), 42);
        assert_eq!(w.caller(), &CallerInfo::new(42));
        assert!(!w.wait_for_exit(Duration::from_millis(1)));
        signal.fire();
        assert!(w.wait_for_exit(Duration::from_millis(1)));
    }
}
