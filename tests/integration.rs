//! Integration tests for `caller-liveness` against the real platform backend.
//!
//! These spawn short-lived child processes (`sleep`) and need no privileges.

#![cfg(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]

use caller_liveness::{CallerInfo, Tracker, TrackerConfig, TrackerError};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_tracker() -> Tracker {
    init_tracing();
    Tracker::with_config(
        TrackerConfig::default()
            .with_safety_delay(Duration::from_millis(20))
            .require_liveness(),
    )
    .unwrap()
}

fn sleep_child(seconds: &str) -> Child {
    Command::new("sleep").arg(seconds).spawn().unwrap()
}

// ---------------------------------------------------------------------------
// Child process scenarios
// ---------------------------------------------------------------------------

#[test]
fn short_lived_child_is_reported_exited() {
    let tracker = fast_tracker();
    let mut child = sleep_child("0.1");

    let w = tracker.new_watcher(&CallerInfo::new(child.id())).unwrap();
    child.wait().unwrap();

    assert!(w.wait_for_exit(EXIT_TIMEOUT));
    let err = w.is_alive().unwrap_err();
    assert!(matches!(err, TrackerError::CallerExited { pid, .. } if pid == child.id()));
    assert_eq!(tracker.watched_count(), 0);
}

#[test]
fn long_lived_child_is_alive_until_killed() {
    let tracker = fast_tracker();
    let mut child = sleep_child("30");

    let w = tracker.new_watcher(&CallerInfo::new(child.id())).unwrap();
    w.is_alive().unwrap();

    child.kill().unwrap();
    child.wait().unwrap();

    assert!(w.wait_for_exit(EXIT_TIMEOUT));
    assert!(w.is_alive().unwrap_err().is_caller_exited());
}

#[test]
fn exit_during_attestation_is_caught_by_safety_delay() {
    init_tracing();
    let tracker = Tracker::with_config(
        TrackerConfig::default().with_safety_delay(Duration::from_millis(300)),
    )
    .unwrap();
    let mut child = sleep_child("0.05");

    let w = tracker.new_watcher(&CallerInfo::new(child.id())).unwrap();
    let reaper = std::thread::spawn(move || child.wait().unwrap());

    // The child exits while `is_alive` is sleeping.
    assert!(w.is_alive().unwrap_err().is_caller_exited());
    reaper.join().unwrap();
}

#[test]
fn watchers_of_one_child_all_observe_exit() {
    let tracker = fast_tracker();
    let mut child = sleep_child("0.1");
    let caller = CallerInfo::new(child.id());

    let watchers: Vec<_> = (0..3).map(|_| tracker.new_watcher(&caller).unwrap()).collect();
    assert_eq!(tracker.watched_count(), 1);

    child.wait().unwrap();
    for w in &watchers {
        assert!(w.wait_for_exit(EXIT_TIMEOUT));
        assert!(w.is_alive().is_err());
    }
}

// ---------------------------------------------------------------------------
// Current process and invalid callers
// ---------------------------------------------------------------------------

#[test]
fn current_process_is_alive_after_default_delay() {
    init_tracing();
    let tracker = Tracker::new().unwrap();
    assert!(tracker.guarantees_liveness());

    let w = tracker
        .new_watcher(&CallerInfo::new(std::process::id()))
        .unwrap();
    let start = Instant::now();
    w.is_alive().unwrap();
    assert!(start.elapsed() >= Duration::from_millis(250));
}

#[test]
fn nonexistent_pid_cannot_be_watched() {
    let tracker = fast_tracker();
    let err = tracker.new_watcher(&CallerInfo::new(999_999_999)).unwrap_err();
    assert!(matches!(err, TrackerError::WatchCreation { pid: 999_999_999, .. }));
    assert_eq!(tracker.watched_count(), 0);
}

#[test]
fn pid_zero_is_invalid() {
    let tracker = fast_tracker();
    assert!(matches!(
        tracker.new_watcher(&CallerInfo::new(0)),
        Err(TrackerError::InvalidCaller { .. })
    ));
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[test]
fn close_returns_while_dispatch_is_blocked() {
    let tracker = fast_tracker();
    let w = tracker
        .new_watcher(&CallerInfo::new(std::process::id()))
        .unwrap();

    tracker.close();

    assert!(matches!(
        tracker.new_watcher(&CallerInfo::new(std::process::id())),
        Err(TrackerError::Closed)
    ));
    // Existing watchers keep answering from their signal.
    w.is_alive().unwrap();
}
