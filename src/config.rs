//! Tracker configuration.

use std::time::Duration;

/// Default delay applied by [`Watcher::is_alive`](crate::Watcher::is_alive)
/// before it answers.
pub const DEFAULT_SAFETY_DELAY: Duration = Duration::from_millis(250);

/// Default number of exit events drained per wake-up of the dispatch loop.
pub const DEFAULT_EVENT_BATCH: usize = 5;

/// Environment variable overriding the safety delay, in milliseconds.
pub const ENV_SAFETY_DELAY_MS: &str = "CALLER_LIVENESS_SAFETY_DELAY_MS";

/// Environment variable that, when `1` or `true`, forbids degraded mode.
pub const ENV_REQUIRE: &str = "CALLER_LIVENESS_REQUIRE";

/// Settings for a [`Tracker`](crate::Tracker).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use caller_liveness::TrackerConfig;
///
/// let config = TrackerConfig::default()
///     .with_safety_delay(Duration::from_millis(100))
///     .require_liveness();
///
/// assert_eq!(config.safety_delay, Duration::from_millis(100));
/// assert!(!config.allow_degraded);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// How long `is_alive` waits before checking the exit signal. Absorbs
    /// kernel delivery and dispatch scheduling latency.
    pub safety_delay: Duration,

    /// Exit events drained per blocking wait. Always at least 1.
    pub event_batch: usize,

    /// Whether a backend that cannot observe exits may be used. When `false`,
    /// building a tracker on such a backend fails.
    pub allow_degraded: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            safety_delay: DEFAULT_SAFETY_DELAY,
            event_batch: DEFAULT_EVENT_BATCH,
            allow_degraded: true,
        }
    }
}

impl TrackerConfig {
    /// Overrides the safety delay.
    #[must_use]
    pub const fn with_safety_delay(mut self, delay: Duration) -> Self {
        self.safety_delay = delay;
        self
    }

    /// Overrides the event batch size. Zero is raised to 1.
    #[must_use]
    pub fn with_event_batch(mut self, batch: usize) -> Self {
        self.event_batch = batch.max(1);
        self
    }

    /// Refuses to run on a backend that cannot observe process exits.
    #[must_use]
    pub const fn require_liveness(mut self) -> Self {
        self.allow_degraded = false;
        self
    }

    /// Applies overrides from the process environment.
    ///
    /// See [`ENV_SAFETY_DELAY_MS`] and [`ENV_REQUIRE`]. Unparseable values are
    /// logged and ignored.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_SAFETY_DELAY_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.safety_delay = Duration::from_millis(ms),
                Err(e) => tracing::warn!(
                    var = ENV_SAFETY_DELAY_MS,
                    value = %raw,
                    error = %e,
                    "Ignoring invalid safety delay override"
                ),
            }
        }

        if let Some(raw) = lookup(ENV_REQUIRE) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.allow_degraded = false,
                "0" | "false" | "no" | "" => {}
                _ => tracing::warn!(
                    var = ENV_REQUIRE,
                    value = %raw,
                    "Ignoring invalid liveness requirement override"
                ),
            }
        }

        self
    }
}
