//! `immo-watchdog` -- dead-man's switch for the batch worker.
//!
//! Launches the worker, then every poll interval reads the timestamp of
//! the last line of its log file. When that timestamp is missing or
//! older than the staleness threshold, every process matching the
//! worker pattern is terminated and the worker is launched again.
//!
//! Logs go to stdout only; writing into the worker's log would count
//! as a heartbeat.
//!
//! # Environment variables
//!
//! | Variable             | Required | Default          | Description                              |
//! |----------------------|----------|------------------|------------------------------------------|
//! | `WORKER_COMMAND`     | yes      | --               | Program and arguments, whitespace-separated |
//! | `WORKER_PATTERN`     | no       | `WORKER_COMMAND` | `pkill -f` pattern for running workers   |
//! | `LOG_FILE`           | no       | `output.log`     | Worker heartbeat log                     |
//! | `POLL_INTERVAL_SECS` | no       | `60`             | Seconds between heartbeat checks         |
//! | `STALE_AFTER_SECS`   | no       | `60`             | Heartbeat age that counts as stalled     |
//! | `RESTART_GRACE_SECS` | no       | `5`              | Pause between terminate and relaunch     |

use immo_watchdog::config::WatchdogConfig;
use immo_watchdog::supervisor::Supervisor;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "immo_watchdog=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WatchdogConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    Supervisor::new(config).run(cancel).await;
}
