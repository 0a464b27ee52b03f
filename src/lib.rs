//! # caller-liveness
//!
//! Verify that the process behind a workload API request is still the one
//! receiving its credential.
//!
//! Attestation maps a connecting PID to an identity, and minting the
//! credential takes time. If the caller exits in between and the kernel hands
//! its PID to another process, a naive server would give the first process's
//! identity to the second. This crate watches the claimed PID for an exit
//! event from the moment it is resolved, and answers "has it exited?" right
//! before the credential is released.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use caller_liveness::{CallerInfo, Tracker};
//!
//! // Once, at startup.
//! let tracker = Tracker::new()?;
//!
//! // Per request, as soon as the peer PID is known.
//! let watcher = tracker.new_watcher(&CallerInfo::new(peer_pid))?;
//! let svid = attest_and_mint(peer_pid)?;
//!
//! // Refuse to hand the credential over if the caller is gone.
//! watcher.is_alive()?;
//! respond(svid);
//! watcher.close();
//!
//! // At shutdown.
//! tracker.close();
//! ```
//!
//! ## Backends
//!
//! | Platform | Backend |
//! |---|---|
//! | macOS, iOS, FreeBSD, OpenBSD, DragonFly | kqueue `EVFILT_PROC` / `NOTE_EXIT` |
//! | Linux 5.3+ | `pidfd_open(2)` + epoll |
//! | others | no-op: every check succeeds, a warning is logged |
//!
//! Use [`TrackerConfig::require_liveness`] to refuse the no-op backend.
//!
//! ## Failure model
//!
//! Every error from [`Watcher::is_alive`] means "do not release the
//! credential". If the exit-notification channel itself breaks, the tracker
//! aborts the process rather than silently answering "alive" from then on;
//! see [`abort_process`].
//!
//! ## Precision
//!
//! Exit events are asynchronous. `is_alive` sleeps for
//! [`TrackerConfig::safety_delay`] (250 ms by default) before answering so
//! that exits racing the check are observed. The registry is keyed on the
//! numeric PID, so a PID reused before its old occupant's exit event arrives
//! is only caught within that latency bound.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod caller;
pub mod config;
pub mod error;
pub mod notifier;
mod registry;
mod signal;
pub mod tracker;
mod util;
pub mod watcher;

pub use caller::CallerInfo;
pub use config::TrackerConfig;
pub use error::{Result, TrackerError};
pub use notifier::{ExitNotifier, NoopNotifier, platform_notifier};
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
pub use notifier::KqueueNotifier;
#[cfg(target_os = "linux")]
pub use notifier::PidfdNotifier;
pub use tracker::{FatalHandler, Tracker, TrackerBuilder, abort_process};
pub use watcher::Watcher;
