//! Caller description.

use crate::error::{Result, TrackerError};

/// A claimed caller, as resolved from the inbound request channel.
///
/// Only `pid` is used for tracking. `uid` and `gid` are optional hints that
/// end up in log fields.
///
/// # Example
///
/// ```
/// use caller_liveness::CallerInfo;
///
/// let caller = CallerInfo::new(4242).with_uid(501).with_gid(20);
///
/// assert_eq!(caller.pid, 4242);
/// assert_eq!(caller.uid, Some(501));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerInfo {
    /// Kernel-assigned process identifier.
    pub pid: u32,

    /// Effective user ID, if the transport reported one.
    pub uid: Option<u32>,

    /// Effective group ID, if the transport reported one.
    pub gid: Option<u32>,
}

impl CallerInfo {
    /// Creates a caller description with no credential hints.
    #[must_use]
    pub const fn new(pid: u32) -> Self {
        Self {
            pid,
            uid: None,
            gid: None,
        }
    }

    /// Attaches the caller's user ID.
    #[must_use]
    pub const fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Attaches the caller's group ID.
    #[must_use]
    pub const fn with_gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    /// Checks that the PID can name a real process.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::InvalidCaller`] for PID 0 or a PID that does
    /// not fit in a `pid_t`.
    pub fn validate(&self) -> Result<()> {
        if self.pid == 0 {
            return Err(TrackerError::InvalidCaller {
                pid: self.pid,
                reason: "pid 0 never identifies a caller",
            });
        }
        if libc::pid_t::try_from(self.pid).is_err() {
            return Err(TrackerError::InvalidCaller {
                pid: self.pid,
                reason: "pid out of range",
            });
        }
        Ok(())
    }
}
