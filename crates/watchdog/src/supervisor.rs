//! Supervision loop.
//!
//! ```text
//! Running ──heartbeat stale──▶ Stalled ──▶ Restarting ──▶ Running
//! ```
//!
//! The loop has no terminal state; it runs until its
//! [`CancellationToken`] fires. Restarts are unconditional: a slow
//! record and a crashed worker look the same from the log.

use chrono::{DateTime, Utc};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use crate::config::WatchdogConfig;
use crate::heartbeat::{is_stalled, last_heartbeat};
use crate::restart::{launch, terminate_matching};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Running,
    Stalled,
    Restarting,
}

pub struct Supervisor {
    config: WatchdogConfig,
    child: Option<Child>,
    state: WatchState,
    restarts: u64,
}

impl Supervisor {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            child: None,
            state: WatchState::Stalled,
            restarts: 0,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Launch the worker, then check its heartbeat every poll interval.
    ///
    /// Workers matching the pattern that are already running (left by an
    /// earlier watchdog) are terminated before the first launch, so a
    /// single worker owns the checkpoint and snapshot files.
    pub async fn run(&mut self, cancel: CancellationToken) {
        tracing::info!(
            command = %self.config.worker_command.join(" "),
            log_file = %self.config.log_file.display(),
            poll_secs = self.config.poll_interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            "Supervision started",
        );

        if self.terminate_running().await {
            tokio::time::sleep(self.config.restart_grace).await;
        }
        self.start();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(restarts = self.restarts, "Supervision stopped");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            self.check(Utc::now()).await;
        }
    }

    /// One supervision step at `now`. Restarts the worker if stalled.
    pub async fn check(&mut self, now: DateTime<Utc>) -> WatchState {
        self.reap();

        let heartbeat = last_heartbeat(&self.config.log_file);
        if !is_stalled(heartbeat, now, self.config.stale_after) {
            tracing::debug!(last_heartbeat = ?heartbeat, "Worker alive");
            self.state = WatchState::Running;
            return self.state;
        }

        self.state = WatchState::Stalled;
        tracing::warn!(
            last_heartbeat = ?heartbeat,
            stale_after_secs = self.config.stale_after.as_secs(),
            "Worker stalled, restarting",
        );
        self.restart().await;
        self.state
    }

    // ---- private helpers ----

    async fn restart(&mut self) {
        self.state = WatchState::Restarting;

        self.terminate_running().await;

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "Owned worker already gone");
            }
        }

        tokio::time::sleep(self.config.restart_grace).await;

        self.restarts += 1;
        self.start();
    }

    /// Terminate every process matching the worker pattern. Returns
    /// whether any matched.
    async fn terminate_running(&self) -> bool {
        match terminate_matching(&self.config.worker_pattern).await {
            Ok(true) => {
                tracing::info!(pattern = %self.config.worker_pattern, "Running worker terminated");
                true
            }
            Ok(false) => {
                tracing::info!("No running worker matched");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to terminate worker");
                false
            }
        }
    }

    fn start(&mut self) {
        match launch(&self.config.worker_command) {
            Ok(child) => {
                self.child = Some(child);
                self.state = WatchState::Running;
            }
            Err(e) => {
                // Stay stalled; the next check retries the launch.
                tracing::error!(error = %e, "Failed to launch worker");
                self.state = WatchState::Stalled;
            }
        }
    }

    /// Collect the exit status of a worker that ended on its own.
    fn reap(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::info!(%status, "Worker exited");
                self.child = None;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Cannot poll worker status"),
        }
    }
}
