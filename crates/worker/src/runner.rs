//! Batch job runner.
//!
//! Walks the dataset once, in order, one record at a time:
//!
//! ```text
//! Pending ──checkpointed──▶ Skipped
//!    │
//!    └──▶ Generating ──▶ Completed | Failed
//! ```
//!
//! Failures never stop the batch. Every `snapshot_every` attempted
//! records, and once more at the end, the completed results are written
//! to the snapshot file and synced. Identifiers completed since the
//! previous snapshot are only appended to the checkpoint file after the
//! snapshot holding their results is on disk, so a checkpointed record
//! always has a durable result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use immo_core::checkpoint::CheckpointStore;
use immo_core::snapshot::SnapshotWriter;
use immo_core::types::{Record, RecordId};

use crate::invoker::GenerationInvoker;
use crate::sync::RemoteSync;
use crate::tasks::RequestBuilder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Snapshot and sync after this many attempted records.
    pub snapshot_every: usize,
    /// Pause after each attempted record. Skipped records do not wait.
    pub record_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            snapshot_every: 5,
            record_delay: Duration::from_secs(2),
        }
    }
}

/// Terminal state of one record within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Skipped,
    Completed,
    Failed,
}

/// Counters for one pass over the dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub skipped: usize,
    pub completed: usize,
    pub failed: usize,
    pub snapshots_written: usize,
    pub snapshot_failures: usize,
    pub sync_failures: usize,
}

impl RunSummary {
    pub fn attempted(&self) -> usize {
        self.completed + self.failed
    }
}

pub struct JobRunner {
    config: RunnerConfig,
    checkpoints: CheckpointStore,
    requests: RequestBuilder,
    invoker: GenerationInvoker,
    snapshots: SnapshotWriter,
    sync: Option<Arc<dyn RemoteSync>>,
    /// Completed since the last successful snapshot, not yet checkpointed.
    pending: Vec<RecordId>,
}

impl JobRunner {
    pub fn new(
        config: RunnerConfig,
        checkpoints: CheckpointStore,
        requests: RequestBuilder,
        invoker: GenerationInvoker,
        snapshots: SnapshotWriter,
    ) -> Self {
        Self {
            config,
            checkpoints,
            requests,
            invoker,
            snapshots,
            sync: None,
            pending: Vec::new(),
        }
    }

    pub fn with_sync(mut self, sync: Arc<dyn RemoteSync>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Process every record once and return the run counters.
    pub async fn run(&mut self, records: &mut [Record]) -> RunSummary {
        let mut summary = RunSummary {
            total: records.len(),
            ..Default::default()
        };

        self.seed_from_snapshot(records);

        tracing::info!(
            total = records.len(),
            already_processed = self.checkpoints.len(),
            snapshot_every = self.config.snapshot_every,
            "Batch started",
        );

        let cadence = self.config.snapshot_every.max(1);
        let mut since_snapshot = 0usize;

        for index in 0..records.len() {
            match self.process(index, &mut records[index]).await {
                RecordOutcome::Skipped => {
                    summary.skipped += 1;
                    continue;
                }
                RecordOutcome::Completed => {
                    summary.completed += 1;
                    self.pending.push(records[index].id.clone());
                }
                RecordOutcome::Failed => summary.failed += 1,
            }

            since_snapshot += 1;
            if since_snapshot >= cadence {
                since_snapshot = 0;
                self.snapshot_and_sync(records, &mut summary).await;
            }

            tokio::time::sleep(self.config.record_delay).await;
        }

        // Final snapshot regardless of cadence alignment.
        self.snapshot_and_sync(records, &mut summary).await;

        tracing::info!(
            total = summary.total,
            skipped = summary.skipped,
            completed = summary.completed,
            failed = summary.failed,
            snapshot_failures = summary.snapshot_failures,
            sync_failures = summary.sync_failures,
            "Batch finished",
        );
        summary
    }

    // ---- private helpers ----

    async fn process(&self, index: usize, record: &mut Record) -> RecordOutcome {
        if self.checkpoints.is_processed(&record.id) {
            tracing::debug!(record_id = %record.id, index, "Already processed, skipping");
            return RecordOutcome::Skipped;
        }

        tracing::info!(record_id = %record.id, index, "Processing record");

        let request = match self.requests.build(record).await {
            Ok(request) => Arc::new(request),
            Err(e) => {
                tracing::error!(record_id = %record.id, error = %e, "Cannot build generation request, skipping");
                return RecordOutcome::Failed;
            }
        };

        let outcome = match self.invoker.generate(&record.id, request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(record_id = %record.id, error = %e, "Record failed, skipping");
                return RecordOutcome::Failed;
            }
        };

        if outcome.completion.text.trim().is_empty() {
            tracing::warn!(
                record_id = %record.id,
                attempt = outcome.attempts,
                "Generation produced no text, leaving record unprocessed",
            );
            return RecordOutcome::Failed;
        }

        tracing::info!(
            record_id = %record.id,
            attempts = outcome.attempts,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            truncated = outcome.completion.is_truncated(),
            "Record completed",
        );
        record.result = Some(outcome.completion.text);
        record.elapsed = Some(outcome.elapsed);
        RecordOutcome::Completed
    }

    /// Write the snapshot, checkpoint what it now holds, then sync.
    ///
    /// A failed write keeps the pending identifiers for the next try.
    async fn snapshot_and_sync(&mut self, records: &[Record], summary: &mut RunSummary) {
        let written = match self.snapshots.snapshot(records) {
            Ok(written) => written,
            Err(e) => {
                summary.snapshot_failures += 1;
                tracing::error!(
                    error = %e,
                    pending = self.pending.len(),
                    "Snapshot write failed, will retry at next cadence",
                );
                return;
            }
        };
        summary.snapshots_written += 1;

        for id in std::mem::take(&mut self.pending) {
            if let Err(e) = self.checkpoints.mark_processed(&id) {
                tracing::error!(record_id = %id, error = %e, "Failed to checkpoint record");
            }
        }

        let Some(sync) = &self.sync else {
            return;
        };
        match sync.sync(&written.path).await {
            Ok(outcome) => tracing::info!(rows = written.rows, ?outcome, "Sync finished"),
            Err(e) => {
                summary.sync_failures += 1;
                tracing::warn!(error = %e, "Sync failed, local snapshot kept");
            }
        }
    }

    /// Carry results from a previous run's snapshot into `records`.
    ///
    /// Without this, the first snapshot after a restart would drop every
    /// result produced before it.
    fn seed_from_snapshot(&self, records: &mut [Record]) {
        if !self.snapshots.path().exists() {
            return;
        }
        let rows = match self.snapshots.load() {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Existing snapshot unreadable, starting without it");
                return;
            }
        };

        let previous: HashMap<String, (String, Option<f64>)> = rows
            .into_iter()
            .map(|row| (row.id, (row.result, row.elapsed_secs)))
            .collect();

        let mut seeded = 0usize;
        for record in records.iter_mut().filter(|r| !r.is_completed()) {
            if let Some((result, elapsed_secs)) = previous.get(&record.id) {
                record.result = Some(result.clone());
                record.elapsed = elapsed_secs.and_then(|s| Duration::try_from_secs_f64(s).ok());
                seeded += 1;
            }
        }

        tracing::info!(
            path = %self.snapshots.path().display(),
            seeded,
            "Resumed results from existing snapshot",
        );
    }
}
