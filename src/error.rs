//! Error types.

use thiserror::Error;

/// Result alias for tracker and watcher operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Errors returned by tracker and watcher operations.
///
/// Every variant means "do not release the credential". Only
/// [`TrackerError::CallerExited`] is the tracker doing its job; the others
/// describe why liveness could not be verified.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The exit-notification primitive could not be created, or the platform
    /// has none and degraded operation was not allowed.
    #[error("process exit notification unavailable: {0}")]
    Unavailable(#[source] std::io::Error),

    /// The caller description cannot be tracked.
    #[error("could not resolve caller information (pid={pid}): {reason}")]
    InvalidCaller {
        /// The rejected PID.
        pid: u32,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The tracker has been closed.
    #[error("tracker has been closed")]
    Closed,

    /// Registering interest in the process exit failed.
    #[error("could not create watcher for pid {pid}: {source}")]
    WatchCreation {
        /// The PID that could not be watched.
        pid: u32,
        /// The OS error from the notifier.
        #[source]
        source: std::io::Error,
    },

    /// The watched process exited.
    #[error("caller exit detected via {backend} notification (pid={pid})")]
    CallerExited {
        /// The PID that exited.
        pid: u32,
        /// The notifier backend that observed the exit.
        backend: &'static str,
    },

    /// The watcher was closed and no longer vouches for the caller.
    #[error("caller is no longer being watched (pid={pid})")]
    NotWatched {
        /// The PID the watcher was bound to.
        pid: u32,
    },
}

impl TrackerError {
    /// Returns `true` if the error reports an observed caller exit.
    #[must_use]
    pub const fn is_caller_exited(&self) -> bool {
        matches!(self, Self::CallerExited { .. })
    }

    /// Returns `true` if a tracker or watcher was used past its lifetime.
    #[must_use]
    pub const fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Closed | Self::NotWatched { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates() {
        let exited = TrackerError::CallerExited {
            pid: 7,
            backend: "kqueue",
        };
        assert!(exited.is_caller_exited());
        assert!(!exited.is_lifecycle());

        assert!(TrackerError::Closed.is_lifecycle());
        assert!(TrackerError::NotWatched { pid: 7 }.is_lifecycle());
        assert!(!TrackerError::Closed.is_caller_exited());
    }

    #[test]
    fn messages_carry_pid_and_backend() {
        let err = TrackerError::CallerExited {
            pid: 4242,
            backend: "pidfd",
        };
        assert_eq!(
            err.to_string(),
            "caller exit detected via pidfd notification (pid=4242)"
        );

        let err = TrackerError::WatchCreation {
            pid: 9,
            source: std::io::Error::from_raw_os_error(libc::ESRCH),
        };
        assert!(err.to_string().starts_with("could not create watcher for pid 9: "));
        assert!(std::error::Error::source(&err).is_some());
    }
}
