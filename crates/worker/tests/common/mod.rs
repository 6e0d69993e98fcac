//! Shared fakes for the worker integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use immo_core::accumulator::AccumulatorPolicy;
use immo_core::checkpoint::CheckpointStore;
use immo_core::generation::{
    FragmentStream, GenerationInput, GenerationOptions, GenerationRequest, Generator, GeneratorError,
};
use immo_core::snapshot::SnapshotWriter;
use immo_core::types::Record;
use immo_worker::invoker::{BackoffConfig, GenerationInvoker, InvokerConfig};
use immo_worker::logging::heartbeat_layer;
use immo_worker::runner::{JobRunner, RunnerConfig};
use immo_worker::sync::{RemoteSync, SyncError, SyncOutcome};
use immo_worker::tasks::{RequestBuilder, Task};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How the fake answers one call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Stream these fragments, then end.
    Fragments(Vec<String>),
    /// Stream these fragments, then hang forever.
    StallAfter(Vec<String>),
    /// Fail before streaming anything.
    Fail(GeneratorError),
}

impl Reply {
    pub fn text(fragments: &[&str]) -> Self {
        Self::Fragments(fragments.iter().map(|f| f.to_string()).collect())
    }

    pub fn stall() -> Self {
        Self::StallAfter(Vec::new())
    }
}

/// In-memory generator answering by prompt substring.
///
/// Each rule holds a queue of replies; calls pop from the front and the
/// last reply repeats once the queue is down to one.
#[derive(Default)]
pub struct ScriptedGenerator {
    rules: Mutex<Vec<(String, Vec<Reply>)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, needle: &str, replies: Vec<Reply>) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((needle.to_string(), replies));
        self
    }

    /// Number of calls whose prompt contained `needle`.
    pub fn calls(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|prompt| prompt.contains(needle))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn stream(&self, request: &GenerationRequest) -> Result<FragmentStream, GeneratorError> {
        let prompt = match &request.input {
            GenerationInput::Prompt(prompt) => prompt.clone(),
            GenerationInput::Chat(messages) => messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        };
        self.calls.lock().unwrap().push(prompt.clone());

        let reply = {
            let mut rules = self.rules.lock().unwrap();
            let replies = rules
                .iter_mut()
                .find(|(needle, _)| prompt.contains(needle.as_str()))
                .map(|(_, replies)| replies);
            match replies {
                Some(replies) if replies.len() > 1 => Some(replies.remove(0)),
                Some(replies) => replies.first().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Fragments(fragments)) => {
                Ok(stream::iter(fragments.into_iter().map(Ok)).boxed())
            }
            Some(Reply::StallAfter(fragments)) => Ok(stream::iter(fragments.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Some(Reply::Fail(error)) => Err(error),
            None => Err(GeneratorError::Service(format!("no script for prompt {prompt:?}"))),
        }
    }
}

/// Remote sync that records every call.
#[derive(Default)]
pub struct RecordingSync {
    pub fail: bool,
    synced: Mutex<Vec<PathBuf>>,
}

impl RecordingSync {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.synced.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteSync for RecordingSync {
    async fn sync(&self, path: &Path) -> Result<SyncOutcome, SyncError> {
        self.synced.lock().unwrap().push(path.to_path_buf());
        if self.fail {
            return Err(SyncError::Git {
                step: "push",
                code: 128,
                stderr: "fatal: unable to access remote".into(),
            });
        }
        Ok(SyncOutcome::Committed)
    }
}

pub const STOP_PHRASE: &str = "Translation complete.";

/// Listing with an id and a `resume` text of `Listing <id>`.
pub fn listing(id: &str) -> Record {
    let fields: BTreeMap<String, String> = [
        ("idannonce".to_string(), id.to_string()),
        ("resume".to_string(), format!("Listing {id}")),
    ]
    .into_iter()
    .collect();
    Record::new(id, fields)
}

pub fn policy() -> Arc<AccumulatorPolicy> {
    Arc::new(AccumulatorPolicy {
        stop_phrases: vec![STOP_PHRASE.to_string()],
        max_fragments: Some(50),
        progress_every: None,
        ..Default::default()
    })
}

/// Short timeouts so exhausted retries finish quickly.
pub fn invoker_config(max_attempts: u32) -> InvokerConfig {
    InvokerConfig {
        timeout: Duration::from_millis(100),
        max_attempts,
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(5),
            multiplier: 1.0,
        },
    }
}

pub fn invoker(generator: Arc<ScriptedGenerator>, max_attempts: u32) -> GenerationInvoker {
    GenerationInvoker::new(generator, policy(), invoker_config(max_attempts))
}

/// Runner over files in `dir`, translating the `resume` column.
pub fn runner(dir: &Path, generator: Arc<ScriptedGenerator>, snapshot_every: usize) -> JobRunner {
    JobRunner::new(
        RunnerConfig {
            snapshot_every,
            record_delay: Duration::ZERO,
        },
        CheckpointStore::open(dir.join("processed_ids.txt")),
        RequestBuilder::new(
            Task::Translate {
                source_column: "resume".into(),
                target_language: "French".into(),
            },
            "test-model",
            GenerationOptions::default(),
        ),
        invoker(generator, 3),
        SnapshotWriter::new(dir.join("results.csv")),
    )
}

/// Send this thread's events to a heartbeat log at `path` until the
/// guard drops. Spawned tasks are covered on the current-thread runtime.
pub fn capture_log(path: &Path) -> DefaultGuard {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open log file");
    tracing_subscriber::registry()
        .with(heartbeat_layer(file))
        .set_default()
}
