//! `immo-worker` library crate.
//!
//! Wires the batch job runner together from configuration. The binary
//! entrypoint lives in `main.rs`; integration tests drive the modules
//! directly.

pub mod config;
pub mod dataset;
pub mod invoker;
pub mod logging;
pub mod runner;
pub mod sync;
pub mod tasks;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use immo_core::checkpoint::CheckpointStore;
use immo_core::snapshot::{ProgressWriter, SnapshotWriter};
use immo_ollama::api::OllamaApi;
use immo_ollama::service::ensure_service;

use crate::config::WorkerConfig;
use crate::invoker::GenerationInvoker;
use crate::runner::{JobRunner, RunSummary};
use crate::sync::GitSync;
use crate::tasks::{RequestBuilder, Task};

/// How long to wait for a freshly launched generation server.
const SERVICE_START_WAIT: Duration = Duration::from_secs(30);

/// Run one full pass over the configured dataset.
///
/// Only startup failures (dataset loads) are returned as errors;
/// per-record problems are logged and counted in the summary.
pub async fn run(config: WorkerConfig) -> anyhow::Result<RunSummary> {
    let api = OllamaApi::new(&config.ollama_url);
    if config.ollama_autostart {
        ensure_service(&api, &config.ollama_bin, SERVICE_START_WAIT).await;
    }

    let mut records = dataset::load_dataset(&config.dataset_source, &config.id_column)
        .await
        .with_context(|| format!("loading dataset {}", config.dataset_source))?;

    let progress = ProgressWriter::new(
        config.token_status_path.clone(),
        config.current_response_path.clone(),
    );
    let invoker = GenerationInvoker::new(
        Arc::new(api),
        Arc::new(config.policy.clone()),
        config.invoker.clone(),
    )
    .with_progress(progress);

    let mut requests =
        RequestBuilder::new(config.task.clone(), &config.model, config.options.clone());
    if let Task::SummarizeListing {
        descriptions_source,
        group_column,
        description_column,
    } = &config.task
    {
        let descriptions =
            dataset::load_grouped(descriptions_source, group_column, description_column)
                .await
                .with_context(|| format!("loading photo descriptions {descriptions_source}"))?;
        requests = requests.with_descriptions(descriptions);
    }

    let mut runner = JobRunner::new(
        config.runner.clone(),
        CheckpointStore::open(&config.checkpoint_path),
        requests,
        invoker,
        SnapshotWriter::new(&config.snapshot_path),
    );
    if let Some(sync) = &config.sync {
        runner = runner.with_sync(Arc::new(GitSync::new(sync.clone())));
    }

    Ok(runner.run(&mut records).await)
}
