//! Platform process-exit notification backends.
//!
//! | Platform | Backend | Primitive |
//! |---|---|---|
//! | macOS, iOS, *BSD | [`KqueueNotifier`] | `EVFILT_PROC` / `NOTE_EXIT` |
//! | Linux | [`PidfdNotifier`] | `pidfd_open(2)` + epoll |
//! | anything else | [`NoopNotifier`] | none (degraded) |

use std::io;
use std::sync::Arc;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
mod kqueue;
mod noop;
#[cfg(target_os = "linux")]
mod pidfd;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
pub use kqueue::KqueueNotifier;
pub use noop::NoopNotifier;
#[cfg(target_os = "linux")]
pub use pidfd::PidfdNotifier;

/// An asynchronous, one-shot process-exit notification channel.
///
/// The tracker calls [`watch`](Self::watch) from caller threads and
/// [`wait`](Self::wait) from its single dispatch thread. Dropping the notifier
/// releases the underlying primitive; the tracker only drops it after the
/// dispatch thread has returned.
pub trait ExitNotifier: Send + Sync {
    /// Short backend name used in log fields and errors.
    fn kind(&self) -> &'static str;

    /// Registers a one-shot watch for the exit of `pid`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the watch cannot be installed, e.g. `ESRCH`
    /// when the process no longer exists.
    fn watch(&self, pid: u32) -> io::Result<()>;

    /// Blocks until at least one event is available, then appends up to `max`
    /// exited PIDs to `exited`. A wake-up with no exits returns `Ok(())` and
    /// leaves `exited` untouched.
    ///
    /// # Errors
    ///
    /// An [`io::ErrorKind::Interrupted`] error is transient. Any other error
    /// is fatal to the channel unless the tracker is shutting down.
    fn wait(&self, exited: &mut Vec<u32>, max: usize) -> io::Result<()>;

    /// Unblocks a pending or future [`wait`](Self::wait).
    ///
    /// # Errors
    ///
    /// Returns the OS error if the wake-up could not be posted.
    fn wake(&self) -> io::Result<()>;

    /// Whether [`watch`](Self::watch) actually observes exits. `false` means
    /// every liveness check succeeds.
    fn verifies_liveness(&self) -> bool {
        true
    }
}

/// Creates the exit notifier for the current platform.
///
/// # Errors
///
/// Returns the OS error if the platform primitive exists but cannot be
/// created (descriptor exhaustion, `ENOSYS` on kernels without `pidfd_open`).
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
pub fn platform_notifier() -> io::Result<Arc<dyn ExitNotifier>> {
    Ok(Arc::new(KqueueNotifier::new()?))
}

/// Creates the exit notifier for the current platform.
///
/// # Errors
///
/// Returns the OS error if the platform primitive exists but cannot be
/// created (descriptor exhaustion, `ENOSYS` on kernels without `pidfd_open`).
#[cfg(target_os = "linux")]
pub fn platform_notifier() -> io::Result<Arc<dyn ExitNotifier>> {
    Ok(Arc::new(PidfdNotifier::new()?))
}

/// Creates the exit notifier for the current platform.
///
/// This platform has no exit notification primitive, so the degraded
/// [`NoopNotifier`] is returned.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly",
)))]
pub fn platform_notifier() -> io::Result<Arc<dyn ExitNotifier>> {
    Ok(Arc::new(NoopNotifier::new()))
}
