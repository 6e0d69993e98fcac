//! `immo-worker` -- resumable batch enrichment of listing data.
//!
//! Loads the dataset, skips identifiers already in the checkpoint file,
//! sends each remaining record to the generation server, and writes the
//! results to a CSV snapshot that is periodically pushed to a git
//! remote. See [`WorkerConfig::from_env`] for the environment variables.

use immo_worker::config::{self, WorkerConfig};
use immo_worker::logging;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let log_file = config::log_file(&|key: &str| std::env::var(key).ok());
    if let Err(e) = logging::init(&log_file) {
        eprintln!("immo-worker: {e:#}");
        std::process::exit(1);
    }

    let config = WorkerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        dataset = %config.dataset_source,
        model = %config.model,
        task = ?config.task,
        "Starting immo-worker",
    );

    match immo_worker::run(config).await {
        Ok(summary) => {
            tracing::info!(
                completed = summary.completed,
                failed = summary.failed,
                skipped = summary.skipped,
                "Worker finished",
            );
        }
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "Worker aborted");
            std::process::exit(1);
        }
    }
}
