//! Fallback backend for platforms without exit notification.

use super::ExitNotifier;
use std::io;
use std::sync::{Condvar, Mutex, PoisonError};

/// Accepts every watch and never reports an exit.
///
/// A tracker built on this backend answers every liveness check with
/// "alive". It exists so the rest of the system can run on platforms without
/// a usable primitive; the tracker logs that the guarantee is degraded, and
/// [`TrackerConfig::require_liveness`](crate::TrackerConfig::require_liveness)
/// refuses it outright.
#[derive(Debug, Default)]
pub struct NoopNotifier {
    woken: Mutex<bool>,
    cond: Condvar,
}

impl NoopNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExitNotifier for NoopNotifier {
    fn kind(&self) -> &'static str {
        "noop"
    }

    fn watch(&self, _pid: u32) -> io::Result<()> {
        Ok(())
    }

    fn wait(&self, _exited: &mut Vec<u32>, _max: usize) -> io::Result<()> {
        let mut woken = self.woken.lock().unwrap_or_else(PoisonError::into_inner);
        while !*woken {
            woken = self
                .cond
                .wait(woken)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *woken = false;
        Ok(())
    }

    fn wake(&self) -> io::Result<()> {
        *self.woken.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
        Ok(())
    }

    fn verifies_liveness(&self) -> bool {
        false
    }
}
