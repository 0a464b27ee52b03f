//! PID → exit signal index.
//!
//! The registry is keyed on the numeric PID, so an entry can outlive the
//! process it was created for until that process's exit event is delivered.
//! That staleness is bounded by notification latency, not eliminated.

use crate::signal::ExitSignal;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Deduplicates watches: N watchers of one PID share one entry and cost one
/// notifier registration.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<HashMap<u32, Arc<ExitSignal>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the signal for `pid`, calling `register` only if no entry
    /// exists yet. A failed registration leaves the registry untouched.
    pub fn get_or_register(
        &self,
        pid: u32,
        register: impl FnOnce() -> io::Result<()>,
    ) -> io::Result<Arc<ExitSignal>> {
        let mut entries = self.lock();
        match entries.entry(pid) {
            Entry::Occupied(e) => Ok(Arc::clone(e.get())),
            Entry::Vacant(e) => {
                register()?;
                tracing::debug!(pid, "Registered exit watch");
                Ok(Arc::clone(e.insert(Arc::new(ExitSignal::new()))))
            }
        }
    }

    /// Fires and removes the entry of every exited PID. PIDs without an entry
    /// are ignored. Returns the number of entries reaped.
    pub fn reap(&self, exited: &[u32]) -> usize {
        let mut entries = self.lock();
        let mut reaped = 0;
        for pid in exited {
            if let Some(signal) = entries.remove(pid) {
                signal.fire();
                reaped += 1;
                tracing::debug!(pid = *pid, "Caller exit observed");
            }
        }
        reaped
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Arc<ExitSignal>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn registers_once_per_pid() {
        let r = Registry::new();
        let calls = Cell::new(0);
        let register = || {
            calls.set(calls.get() + 1);
            Ok(())
        };

        let a = r.get_or_register(100, register).unwrap();
        let b = r.get_or_register(100, register).unwrap();
        r.get_or_register(101, register).unwrap();

        assert_eq!(calls.get(), 2);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn failed_registration_inserts_nothing() {
        let r = Registry::new();
        let err = r
            .get_or_register(100, || Err(io::Error::from_raw_os_error(libc::ESRCH)))
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ESRCH));
        assert_eq!(r.len(), 0);
    }

    #[test]
    fn reap_fires_and_removes() {
        let r = Registry::new();
        let s = r.get_or_register(100, || Ok(())).unwrap();
        let other = r.get_or_register(200, || Ok(())).unwrap();

        assert_eq!(r.reap(&[100, 300]), 1);
        assert!(s.has_fired());
        assert!(!other.has_fired());
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn pid_reused_after_reap_gets_fresh_signal() {
        let r = Registry::new();
        let old = r.get_or_register(100, || Ok(())).unwrap();
        r.reap(&[100]);

        let new = r.get_or_register(100, || Ok(())).unwrap();
        assert!(old.has_fired());
        assert!(!new.has_fired());
    }
}
