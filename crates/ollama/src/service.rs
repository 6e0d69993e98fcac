//! Local server autostart.
//!
//! Long unattended runs often begin on a freshly booted machine where
//! the model server is not up yet. [`ensure_service`] probes the API
//! and, if nothing answers, launches `<program> serve` detached and
//! waits for it to respond.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::api::OllamaApi;

/// Interval between readiness probes after a launch.
const PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Make sure the server behind `api` is answering.
///
/// Returns `true` once the server responds. A failed launch or a
/// server that stays silent for `wait` is logged and reported as
/// `false`; callers carry on and let generation retries absorb it.
pub async fn ensure_service(api: &OllamaApi, program: &str, wait: Duration) -> bool {
    if let Ok(version) = api.version().await {
        tracing::info!(base_url = api.base_url(), %version, "Generation service already running");
        return true;
    }

    tracing::info!(base_url = api.base_url(), program, "Starting generation service");

    // The child is not awaited; the server outlives this handle.
    let spawned = Command::new(program)
        .arg("serve")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    if let Err(e) = spawned {
        tracing::error!(program, error = %e, "Failed to start generation service");
        return false;
    }

    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        tokio::time::sleep(PROBE_INTERVAL.min(wait)).await;
        if api.version().await.is_ok() {
            tracing::info!(base_url = api.base_url(), "Generation service is up");
            return true;
        }
    }

    tracing::error!(
        base_url = api.base_url(),
        wait_secs = wait.as_secs(),
        "Generation service did not come up",
    );
    false
}
