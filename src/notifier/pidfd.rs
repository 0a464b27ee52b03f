//! Linux backend: one `pidfd` per watched process, multiplexed with epoll.
//!
//! A pidfd becomes readable once its process terminates, and stays readable
//! after the process is reaped. Each pidfd is registered with
//! `EPOLLONESHOT` and its epoll token is the PID itself. An `eventfd` with a
//! reserved token wakes the dispatch thread on shutdown.

use super::ExitNotifier;
use crate::util::cvt;
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Epoll token of the wake-up eventfd. PIDs are at most `i32::MAX`.
const WAKE_TOKEN: u64 = u64::MAX;

#[allow(clippy::cast_sign_loss)]
const WATCH_EVENTS: u32 = (libc::EPOLLIN | libc::EPOLLONESHOT) as u32;

#[allow(clippy::cast_sign_loss)]
const WAKE_EVENTS: u32 = libc::EPOLLIN as u32;

/// Exit notifier built on `pidfd_open(2)` and epoll. Requires Linux 5.3+.
#[derive(Debug)]
pub struct PidfdNotifier {
    epoll: OwnedFd,
    waker: OwnedFd,
    pidfds: Mutex<HashMap<u32, OwnedFd>>,
}

impl PidfdNotifier {
    /// Creates the epoll set and its wake-up eventfd.
    ///
    /// # Errors
    ///
    /// Returns `ENOSYS` on kernels without `pidfd_open`, or the OS error if a
    /// descriptor cannot be allocated.
    pub fn new() -> io::Result<Self> {
        drop(pidfd_open(std::process::id())?);

        // SAFETY: both calls return fresh descriptors that nothing else owns.
        let (epoll, waker) = unsafe {
            let epoll = OwnedFd::from_raw_fd(cvt(libc::epoll_create1(libc::EPOLL_CLOEXEC))?);
            let waker = OwnedFd::from_raw_fd(cvt(libc::eventfd(
                0,
                libc::EFD_CLOEXEC | libc::EFD_NONBLOCK,
            ))?);
            (epoll, waker)
        };
        epoll_add(epoll.as_raw_fd(), waker.as_raw_fd(), WAKE_EVENTS, WAKE_TOKEN)?;

        tracing::debug!(backend = "pidfd", "Created exit notifier");
        Ok(Self {
            epoll,
            waker,
            pidfds: Mutex::new(HashMap::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, OwnedFd>> {
        self.pidfds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain_waker(&self) {
        let mut counter = 0u64;
        // SAFETY: reads exactly 8 bytes into a local u64, as eventfd requires.
        // EAGAIN just means another wait already drained it.
        unsafe {
            libc::read(
                self.waker.as_raw_fd(),
                (&raw mut counter).cast::<libc::c_void>(),
                std::mem::size_of::<u64>(),
            );
        }
    }
}

impl ExitNotifier for PidfdNotifier {
    fn kind(&self) -> &'static str {
        "pidfd"
    }

    fn watch(&self, pid: u32) -> io::Result<()> {
        let pidfd = pidfd_open(pid)?;
        // Held across registration so `wait` cannot see the event before the
        // descriptor is in the map.
        let mut pidfds = self.lock();
        epoll_add(
            self.epoll.as_raw_fd(),
            pidfd.as_raw_fd(),
            WATCH_EVENTS,
            u64::from(pid),
        )?;
        pidfds.insert(pid, pidfd);
        Ok(())
    }

    fn wait(&self, exited: &mut Vec<u32>, max: usize) -> io::Result<()> {
        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; max.max(1)];
        let capacity = libc::c_int::try_from(events.len()).unwrap_or(libc::c_int::MAX);

        // SAFETY: the buffer holds at least `capacity` initialized events.
        let ready = cvt(unsafe {
            libc::epoll_wait(self.epoll.as_raw_fd(), events.as_mut_ptr(), capacity, -1)
        })?;
        let ready = usize::try_from(ready).unwrap_or(0);

        let mut pidfds = self.lock();
        for event in &events[..ready] {
            let token = event.u64;
            if token == WAKE_TOKEN {
                self.drain_waker();
                continue;
            }
            let Ok(pid) = u32::try_from(token) else {
                tracing::warn!(token, backend = "pidfd", "Failed to cast PID from epoll token");
                continue;
            };
            // Dropping the pidfd also removes it from the epoll set.
            pidfds.remove(&pid);
            exited.push(pid);
        }
        Ok(())
    }

    fn wake(&self) -> io::Result<()> {
        let one = 1u64;
        // SAFETY: writes exactly 8 bytes from a local u64, as eventfd requires.
        let ret = unsafe {
            libc::write(
                self.waker.as_raw_fd(),
                (&raw const one).cast::<libc::c_void>(),
                std::mem::size_of::<u64>(),
            )
        };
        if ret == -1 {
            let err = io::Error::last_os_error();
            // Counter saturated: a wake-up is already pending.
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }
}

fn pidfd_open(pid: u32) -> io::Result<OwnedFd> {
    let pid = libc::pid_t::try_from(pid).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    // SAFETY: pidfd_open(pid, 0) takes plain integers and returns a new
    // close-on-exec descriptor or -1.
    let ret = unsafe { libc::syscall(libc::SYS_pidfd_open, pid, 0 as libc::c_uint) };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    let fd = RawFd::try_from(ret).map_err(|_| io::Error::from_raw_os_error(libc::EBADF))?;
    // SAFETY: the kernel just handed us this descriptor.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn epoll_add(epoll: RawFd, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
    let mut event = libc::epoll_event { events, u64: token };
    // SAFETY: `event` is a valid epoll_event for the duration of the call.
    cvt(unsafe { libc::epoll_ctl(epoll, libc::EPOLL_CTL_ADD, fd, &raw mut event) })?;
    Ok(())
}
