//! BSD/macOS backend: `EVFILT_PROC` + `NOTE_EXIT` one-shot filters on a kqueue.
//!
//! A non-blocking self-pipe is registered with `EVFILT_READ` so the dispatch
//! thread can be woken on shutdown without closing the kqueue under it.

use super::ExitNotifier;
use crate::util::{cvt, set_nonblocking_cloexec};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Exit notifier built on kqueue.
#[derive(Debug)]
pub struct KqueueNotifier {
    kq: OwnedFd,
    wake_read: OwnedFd,
    wake_write: OwnedFd,
}

impl KqueueNotifier {
    /// Creates the kqueue and its wake-up pipe.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a descriptor cannot be allocated.
    pub fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: kqueue() and pipe() return fresh descriptors that nothing
        // else owns; `fds` has room for both pipe ends.
        let (kq, wake_read, wake_write) = unsafe {
            let kq = OwnedFd::from_raw_fd(cvt(libc::kqueue())?);
            cvt(libc::pipe(fds.as_mut_ptr()))?;
            (
                kq,
                OwnedFd::from_raw_fd(fds[0]),
                OwnedFd::from_raw_fd(fds[1]),
            )
        };
        set_nonblocking_cloexec(wake_read.as_raw_fd())?;
        set_nonblocking_cloexec(wake_write.as_raw_fd())?;

        #[allow(clippy::cast_sign_loss)]
        let ident = wake_read.as_raw_fd() as usize;
        let change = kevent(ident, libc::EVFILT_READ, libc::EV_ADD, 0u32);
        register(kq.as_raw_fd(), &change)?;

        tracing::debug!(backend = "kqueue", "Created exit notifier");
        Ok(Self {
            kq,
            wake_read,
            wake_write,
        })
    }

    fn drain_waker(&self) {
        let mut buf = [0u8; 64];
        // SAFETY: reads into a local buffer of the stated length. The pipe is
        // non-blocking, so the loop ends on EAGAIN.
        while unsafe {
            libc::read(
                self.wake_read.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
            )
        } > 0
        {}
    }
}

impl ExitNotifier for KqueueNotifier {
    fn kind(&self) -> &'static str {
        "kqueue"
    }

    fn watch(&self, pid: u32) -> io::Result<()> {
        let ident = usize::try_from(pid).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        let change = kevent(
            ident,
            libc::EVFILT_PROC,
            libc::EV_ADD | libc::EV_ONESHOT,
            libc::NOTE_EXIT,
        );
        register(self.kq.as_raw_fd(), &change)
    }

    fn wait(&self, exited: &mut Vec<u32>, max: usize) -> io::Result<()> {
        // SAFETY: kevent is plain old data; all-zero is a valid value.
        let mut events: Vec<libc::kevent> = vec![unsafe { std::mem::zeroed() }; max.max(1)];
        let capacity = libc::c_int::try_from(events.len()).unwrap_or(libc::c_int::MAX);

        // SAFETY: no changes are submitted; the output buffer holds at least
        // `capacity` events; a null timeout blocks indefinitely.
        let ready = cvt(unsafe {
            libc::kevent(
                self.kq.as_raw_fd(),
                std::ptr::null(),
                0,
                events.as_mut_ptr(),
                capacity,
                std::ptr::null(),
            )
        })?;
        let ready = usize::try_from(ready).unwrap_or(0);

        #[allow(clippy::cast_sign_loss)]
        let wake_ident = self.wake_read.as_raw_fd() as usize;
        for event in &events[..ready] {
            if event.filter == libc::EVFILT_READ && event.ident == wake_ident {
                self.drain_waker();
                continue;
            }
            if event.filter != libc::EVFILT_PROC || event.fflags & libc::NOTE_EXIT == 0 {
                continue;
            }
            match u32::try_from(event.ident) {
                Ok(pid) => exited.push(pid),
                Err(e) => tracing::warn!(
                    ident = event.ident,
                    backend = "kqueue",
                    error = %e,
                    "Failed to cast PID from kevent"
                ),
            }
        }
        Ok(())
    }

    fn wake(&self) -> io::Result<()> {
        let byte = 1u8;
        // SAFETY: writes one byte from a local.
        let ret = unsafe {
            libc::write(
                self.wake_write.as_raw_fd(),
                (&raw const byte).cast::<libc::c_void>(),
                1,
            )
        };
        if ret == -1 {
            let err = io::Error::last_os_error();
            // Pipe full: a wake-up is already pending.
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Builds a change entry. Field types differ between BSDs, hence the casts.
#[allow(clippy::cast_lossless, clippy::unnecessary_cast)]
fn kevent<F, L, N>(ident: usize, filter: F, flags: L, fflags: N) -> libc::kevent
where
    F: Into<i64>,
    L: Into<u64>,
    N: Into<u64>,
{
    let (filter, flags, fflags): (i64, u64, u64) = (filter.into(), flags.into(), fflags.into());
    // SAFETY: kevent is plain old data; all-zero is a valid value.
    let mut ev: libc::kevent = unsafe { std::mem::zeroed() };
    ev.ident = ident as _;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        ev.filter = filter as _;
        ev.flags = flags as _;
        ev.fflags = fflags as _;
    }
    ev
}

/// Submits one change and fails with the registration error, if any.
fn register(kq: RawFd, change: &libc::kevent) -> io::Result<()> {
    // SAFETY: one valid change entry, no output buffer, no timeout.
    cvt(unsafe {
        libc::kevent(
            kq,
            std::ptr::from_ref(change),
            1,
            std::ptr::null_mut(),
            0,
            std::ptr::null(),
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::is_process_alive;
    use std::process::Command;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn watch_nonexistent_pid_fails() {
        let n = KqueueNotifier::new().unwrap();
        let err = n.watch(999_999_999).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ESRCH));
    }

    #[test]
    fn child_exit_is_reported() {
        let n = KqueueNotifier::new().unwrap();
        let mut child = Command::new("sleep").arg("0.05").spawn().unwrap();
        let pid = child.id();

        n.watch(pid).unwrap();
        child.wait().unwrap();
        assert!(!is_process_alive(pid));

        let mut exited = Vec::new();
        n.wait(&mut exited, 5).unwrap();
        assert_eq!(exited, vec![pid]);
    }

    #[test]
    fn wake_unblocks_wait() {
        let n = Arc::new(KqueueNotifier::new().unwrap());
        n.watch(std::process::id()).unwrap();
        let waiter = {
            let n = Arc::clone(&n);
            std::thread::spawn(move || {
                let mut exited = Vec::new();
                n.wait(&mut exited, 5).map(|()| exited)
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        n.wake().unwrap();
        assert!(waiter.join().unwrap().unwrap().is_empty());
    }
}
