//! Process-wide owner of the exit notifier, the watch registry and the
//! dispatch thread.

use crate::caller::CallerInfo;
use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::notifier::{ExitNotifier, platform_notifier};
use crate::registry::Registry;
use crate::watcher::Watcher;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Name of the dispatch thread.
pub const DISPATCH_THREAD_NAME: &str = "caller-liveness-dispatch";

/// Called by the dispatch thread when the exit-notification channel fails for
/// any reason other than shutdown or a transient interruption.
pub type FatalHandler = Arc<dyn Fn(&io::Error) + Send + Sync>;

/// Default [`FatalHandler`]: logs the error, flushes stderr and aborts.
///
/// A broken exit channel would make every later liveness check succeed,
/// reopening the PID-reuse race for every caller. Crashing is the
/// supervision-visible outcome; serving with unverifiable liveness is not.
pub fn abort_process(err: &io::Error) {
    tracing::error!(
        error = %err,
        "Unrecoverable error while reading process exit events, aborting"
    );
    let _ = io::stderr().flush();
    std::process::abort();
}

/// State shared with the dispatch thread.
struct Shared {
    registry: Registry,
    cancelled: AtomicBool,
}

impl Shared {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Hands out [`Watcher`]s and keeps them informed of caller exits.
///
/// # Lifecycle
///
/// 1. [`new`](Self::new) (or [`builder`](Self::builder)) acquires the
///    platform notifier and starts one dispatch thread.
/// 2. [`new_watcher`](Self::new_watcher) is called per inbound request.
/// 3. [`close`](Self::close) stops the thread, then releases the notifier.
///    Dropping the tracker closes it too.
///
/// # Example
///
/// ```rust,ignore
/// use caller_liveness::{CallerInfo, Tracker};
///
/// let tracker = Tracker::new()?;
/// let watcher = tracker.new_watcher(&CallerInfo::new(peer_pid))?;
///
/// let svid = attest_and_mint(peer_pid)?;
/// watcher.is_alive()?;
/// send(svid);
///
/// watcher.close();
/// ```
pub struct Tracker {
    notifier: Mutex<Option<Arc<dyn ExitNotifier>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
    config: TrackerConfig,
    backend: &'static str,
    verifies_liveness: bool,
}

impl Tracker {
    /// Creates a tracker on the platform notifier with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Unavailable`] if the notifier cannot be created.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Creates a tracker on the platform notifier.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Unavailable`] if the notifier cannot be
    /// created, or if it cannot observe exits and `config` forbids that.
    pub fn with_config(config: TrackerConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Starts a builder for custom notifiers and fatal handlers.
    #[must_use]
    pub fn builder() -> TrackerBuilder {
        TrackerBuilder::default()
    }

    /// Starts watching the caller's PID and returns a handle bound to it.
    ///
    /// Watchers for the same PID share one notifier registration.
    ///
    /// # Errors
    ///
    /// - [`TrackerError::InvalidCaller`] if the PID is 0 or out of range.
    /// - [`TrackerError::Closed`] if [`close`](Self::close) was called.
    /// - [`TrackerError::WatchCreation`] if the notifier refused the PID,
    ///   typically because the process is already gone.
    pub fn new_watcher(&self, caller: &CallerInfo) -> Result<Watcher> {
        caller.validate()?;

        let notifier = self.lock_notifier();
        let Some(notifier) = notifier.as_ref() else {
            return Err(TrackerError::Closed);
        };

        let signal = self
            .shared
            .registry
            .get_or_register(caller.pid, || notifier.watch(caller.pid))
            .map_err(|source| {
                tracing::warn!(
                    pid = caller.pid,
                    backend = self.backend,
                    error = %source,
                    "Could not watch caller"
                );
                TrackerError::WatchCreation {
                    pid: caller.pid,
                    source,
                }
            })?;

        Ok(Watcher::new(
            *caller,
            signal,
            self.config.safety_delay,
            self.backend,
        ))
    }

    /// Stops the dispatch thread, then releases the notifier.
    ///
    /// Later [`new_watcher`](Self::new_watcher) calls fail with
    /// [`TrackerError::Closed`]. Calling this more than once is a no-op.
    pub fn close(&self) {
        let Some(notifier) = self.lock_notifier().take() else {
            return;
        };

        // Cancel before waking so the thread reads any wake-up or error from
        // the wait as shutdown.
        self.shared.cancelled.store(true, Ordering::Release);

        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match notifier.wake() {
            Ok(()) => {
                if let Some(handle) = handle {
                    if handle.join().is_err() {
                        tracing::error!(backend = self.backend, "Dispatch thread panicked");
                    }
                }
            }
            // The thread keeps its own handle on the notifier, so detaching
            // it cannot leave it reading a released primitive.
            Err(e) => tracing::warn!(
                backend = self.backend,
                error = %e,
                "Could not wake dispatch thread, detaching it"
            ),
        }

        drop(notifier);
        tracing::info!(backend = self.backend, "Closed caller liveness tracker");
    }

    /// Number of PIDs currently watched.
    ///
    /// Entries are only removed when their process exits, so this counts
    /// distinct watched PIDs whose exit has not been observed yet.
    #[must_use]
    pub fn watched_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Whether the backend actually observes exits. `false` means every
    /// liveness check succeeds.
    #[must_use]
    pub const fn guarantees_liveness(&self) -> bool {
        self.verifies_liveness
    }

    /// Name of the notifier backend.
    #[must_use]
    pub const fn backend(&self) -> &'static str {
        self.backend
    }

    /// The settings this tracker was built with.
    #[must_use]
    pub const fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn lock_notifier(&self) -> MutexGuard<'_, Option<Arc<dyn ExitNotifier>>> {
        self.notifier.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builder for [`Tracker`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use caller_liveness::{NoopNotifier, Tracker, TrackerConfig};
///
/// let tracker = Tracker::builder()
///     .config(TrackerConfig::default())
///     .notifier(Arc::new(NoopNotifier::new()))
///     .build()
///     .unwrap();
///
/// assert!(!tracker.guarantees_liveness());
/// tracker.close();
/// ```
pub struct TrackerBuilder {
    config: TrackerConfig,
    notifier: Option<Arc<dyn ExitNotifier>>,
    on_unrecoverable: FatalHandler,
}

impl Default for TrackerBuilder {
    fn default() -> Self {
        Self {
            config: TrackerConfig::default(),
            notifier: None,
            on_unrecoverable: Arc::new(abort_process),
        }
    }
}

impl TrackerBuilder {
    /// Sets the tracker configuration.
    #[must_use]
    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `notifier` instead of the platform notifier.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn ExitNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replaces [`abort_process`] as the reaction to an unrecoverable
    /// notifier error. The dispatch thread stops after calling it.
    #[must_use]
    pub fn on_unrecoverable(
        mut self,
        handler: impl Fn(&io::Error) + Send + Sync + 'static,
    ) -> Self {
        self.on_unrecoverable = Arc::new(handler);
        self
    }

    /// Acquires the notifier and starts the dispatch thread.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Unavailable`] if the platform notifier cannot
    /// be created, if the dispatch thread cannot be spawned, or if the
    /// notifier cannot observe exits while
    /// [`TrackerConfig::allow_degraded`] is `false`.
    pub fn build(self) -> Result<Tracker> {
        let notifier = match self.notifier {
            Some(notifier) => notifier,
            None => platform_notifier().map_err(TrackerError::Unavailable)?,
        };
        let backend = notifier.kind();
        let verifies_liveness = notifier.verifies_liveness();

        if !verifies_liveness {
            if !self.config.allow_degraded {
                return Err(TrackerError::Unavailable(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("{backend} backend cannot observe process exits"),
                )));
            }
            tracing::warn!(
                backend,
                "Process exit notification unavailable, caller liveness is not verified"
            );
        }

        let shared = Arc::new(Shared {
            registry: Registry::new(),
            cancelled: AtomicBool::new(false),
        });

        let dispatcher = {
            let shared = Arc::clone(&shared);
            let notifier = Arc::clone(&notifier);
            let on_unrecoverable = self.on_unrecoverable;
            let batch = self.config.event_batch.max(1);
            std::thread::Builder::new()
                .name(DISPATCH_THREAD_NAME.to_string())
                .spawn(move || dispatch(&shared, notifier.as_ref(), &on_unrecoverable, batch))
                .map_err(TrackerError::Unavailable)?
        };

        tracing::info!(
            backend,
            safety_delay_ms = u64::try_from(self.config.safety_delay.as_millis()).unwrap_or(u64::MAX),
            "Started caller liveness tracker"
        );

        Ok(Tracker {
            notifier: Mutex::new(Some(notifier)),
            dispatcher: Mutex::new(Some(dispatcher)),
            shared,
            config: self.config,
            backend,
            verifies_liveness,
        })
    }
}

/// Drains exit events and fires the matching registry entries until the
/// tracker is cancelled.
fn dispatch(
    shared: &Shared,
    notifier: &dyn ExitNotifier,
    on_unrecoverable: &FatalHandler,
    batch: usize,
) {
    let backend = notifier.kind();
    let mut exited = Vec::with_capacity(batch);

    while !shared.is_cancelled() {
        exited.clear();
        if let Err(err) = notifier.wait(&mut exited, batch) {
            if shared.is_cancelled() {
                break;
            }
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            tracing::error!(backend, error = %err, "Process exit channel failed");
            on_unrecoverable(&err);
            return;
        }

        if !exited.is_empty() {
            shared.registry.reap(&exited);
        }
    }

    tracing::debug!(backend, "Dispatch loop stopped");
}
