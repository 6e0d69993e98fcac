//! Integration tests for heartbeat reading and the supervision step.
//!
//! Log files are written to temp directories in the same shape the
//! worker's file logging layer produces.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use immo_watchdog::config::WatchdogConfig;
use immo_watchdog::heartbeat::{is_stalled, last_heartbeat, read_last_line};
use immo_watchdog::restart::terminate_matching;
use immo_watchdog::supervisor::{Supervisor, WatchState};
use tokio_util::sync::CancellationToken;

fn write_log(path: &Path, contents: &str) {
    let mut file = std::fs::File::create(path).expect("create log");
    file.write_all(contents.as_bytes()).expect("write log");
}

// ---------------------------------------------------------------------------
// Test: last line extraction
// ---------------------------------------------------------------------------

#[test]
fn last_line_skips_trailing_blank_lines() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let log = dir.path().join("output.log");
    write_log(
        &log,
        "2026-10-16T08:00:00.000001Z  INFO immo_worker: Batch started\n\
         2026-10-16T08:00:05.000001Z  INFO immo_worker::runner: Record completed record_id=B\n\n  \n",
    );

    assert_eq!(
        read_last_line(&log).unwrap().as_deref(),
        Some("2026-10-16T08:00:05.000001Z  INFO immo_worker::runner: Record completed record_id=B")
    );
    assert_eq!(
        last_heartbeat(&log),
        Some(Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 5).unwrap() + chrono::Duration::microseconds(1))
    );
}

/// Lines longer than the tail window are still read whole.
#[test]
fn last_line_longer_than_tail_window() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let log = dir.path().join("output.log");
    let long_line = format!("2026-10-16T08:00:05Z  INFO immo_worker: {}", "x".repeat(20_000));
    write_log(&log, &format!("2026-10-16T07:00:00Z  INFO first\n{long_line}\n"));

    assert_eq!(read_last_line(&log).unwrap(), Some(long_line));
    assert_eq!(
        last_heartbeat(&log),
        Some(Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 5).unwrap())
    );
}

#[test]
fn single_line_without_newline() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let log = dir.path().join("output.log");
    write_log(&log, "2026-10-16 08:00:05,250 - INFO - Processing 42");

    assert_eq!(
        read_last_line(&log).unwrap().as_deref(),
        Some("2026-10-16 08:00:05,250 - INFO - Processing 42")
    );
    assert!(last_heartbeat(&log).is_some());
}

// ---------------------------------------------------------------------------
// Test: missing or corrupt heartbeats count as stalled
// ---------------------------------------------------------------------------

#[test]
fn missing_empty_and_corrupt_logs_are_stalled() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let now = Utc::now();
    let threshold = Duration::from_secs(60);

    let missing = dir.path().join("missing.log");
    assert_eq!(last_heartbeat(&missing), None);
    assert!(is_stalled(last_heartbeat(&missing), now, threshold));

    let empty = dir.path().join("empty.log");
    write_log(&empty, "\n\n");
    assert!(is_stalled(last_heartbeat(&empty), now, threshold));

    let corrupt = dir.path().join("corrupt.log");
    write_log(&corrupt, "2026-10-16T08:00:00Z  INFO ok\nthread 'main' panicked at src/main.rs\n");
    assert!(is_stalled(last_heartbeat(&corrupt), now, threshold));
}

// ---------------------------------------------------------------------------
// Test: supervision step
// ---------------------------------------------------------------------------

fn config(log_file: &Path) -> WatchdogConfig {
    WatchdogConfig {
        worker_command: vec!["true".into()],
        // Matches nothing on the host, so terminating is harmless.
        worker_pattern: "immo-watchdog-test-no-such-process-7f3a".into(),
        log_file: log_file.to_path_buf(),
        poll_interval: Duration::from_secs(60),
        stale_after: Duration::from_secs(60),
        restart_grace: Duration::ZERO,
    }
}

#[tokio::test]
async fn fresh_heartbeat_leaves_worker_alone() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let log = dir.path().join("output.log");
    let now = Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 30).unwrap();
    write_log(&log, "2026-10-16T08:00:05Z  INFO immo_worker: Processing record\n");

    let mut supervisor = Supervisor::new(config(&log));
    assert_eq!(supervisor.check(now).await, WatchState::Running);
    assert_eq!(supervisor.restarts(), 0);
}

#[tokio::test]
async fn stale_heartbeat_triggers_restart() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let log = dir.path().join("output.log");
    let now = Utc.with_ymd_and_hms(2026, 10, 16, 8, 5, 0).unwrap();
    write_log(&log, "2026-10-16T08:00:05Z  INFO immo_worker: Processing record\n");

    let mut supervisor = Supervisor::new(config(&log));
    let state = supervisor.check(now).await;

    assert_eq!(supervisor.restarts(), 1);
    assert_eq!(state, WatchState::Running);
}

/// Processes whose command line matches `pattern`, from `pgrep -f`.
fn matching_pids(pattern: &str) -> Vec<String> {
    let output = std::process::Command::new("pgrep")
        .args(["-f", pattern])
        .output()
        .expect("run pgrep");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect()
}

/// A worker left running by an earlier watchdog is terminated before
/// the first launch, leaving exactly one worker.
#[tokio::test]
async fn startup_replaces_leftover_worker() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let log = dir.path().join("output.log");
    let command = vec!["sleep".to_string(), "4242.75".to_string()];
    let pattern = command.join(" ");

    let mut leftover = std::process::Command::new(&command[0])
        .arg(&command[1])
        .spawn()
        .expect("spawn leftover worker");

    let mut supervisor = Supervisor::new(WatchdogConfig {
        worker_command: command.clone(),
        worker_pattern: pattern.clone(),
        log_file: log,
        poll_interval: Duration::from_secs(60),
        stale_after: Duration::from_secs(60),
        restart_grace: Duration::from_millis(50),
    });

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        stopper.cancel();
    });
    supervisor.run(cancel).await;

    let mut leftover_exited = false;
    for _ in 0..40 {
        if leftover.try_wait().expect("poll leftover").is_some() {
            leftover_exited = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let running = matching_pids(&pattern);

    terminate_matching(&pattern).await.expect("clean up workers");
    if !leftover_exited {
        leftover.kill().ok();
        leftover.wait().ok();
    }

    assert!(leftover_exited, "leftover worker still running");
    assert_eq!(running.len(), 1, "expected one worker, found {running:?}");
    assert_eq!(supervisor.state(), WatchState::Running);
    assert_eq!(supervisor.restarts(), 0);
}
