use std::path::PathBuf;
use std::time::Duration;

use immo_core::accumulator::{AccumulatorPolicy, DEFAULT_TRUNCATION_MARKER};
use immo_core::env::{self, ConfigError};
use immo_core::generation::GenerationOptions;

use crate::invoker::{BackoffConfig, InvokerConfig};
use crate::runner::RunnerConfig;
use crate::sync::GitSyncConfig;
use crate::tasks::Task;

/// Default heartbeat log location, shared with the watchdog.
pub const DEFAULT_LOG_FILE: &str = "output.log";

/// Upper bound on a single git invocation during sync.
const GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Worker configuration loaded from environment variables.
///
/// Only `DATASET_SOURCE` is required; everything else defaults to the
/// values used for the listing-translation batch.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Local path or http(s) URL of the dataset CSV.
    pub dataset_source: String,
    pub id_column: String,
    pub task: Task,
    pub model: String,
    pub ollama_url: String,
    /// Launch `<ollama_bin> serve` when the server is not answering.
    pub ollama_autostart: bool,
    pub ollama_bin: String,
    pub options: GenerationOptions,
    pub policy: AccumulatorPolicy,
    pub invoker: InvokerConfig,
    pub runner: RunnerConfig,
    pub checkpoint_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub token_status_path: Option<PathBuf>,
    pub current_response_path: Option<PathBuf>,
    /// Heartbeat log written by the file logging layer.
    pub log_file: PathBuf,
    /// Remote sync settings. `None` disables sync.
    pub sync: Option<GitSyncConfig>,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                   | Default                     |
    /// |---------------------------|-----------------------------|
    /// | `DATASET_SOURCE`          | required                    |
    /// | `ID_COLUMN`               | `idannonce`                 |
    /// | `TASK`                    | `translate`                 |
    /// | `SOURCE_COLUMN`           | `resume`                    |
    /// | `IMAGE_COLUMN`            | `url_img`                   |
    /// | `DESCRIPTIONS_SOURCE`     | required for summaries      |
    /// | `DESCRIPTION_GROUP_COLUMN`| `idannonce`                 |
    /// | `DESCRIPTION_COLUMN`      | `content`                   |
    /// | `TARGET_LANGUAGE`         | `French`                    |
    /// | `MODEL`                   | `qwen2.5:7b`                |
    /// | `OLLAMA_URL`              | `http://localhost:11434`    |
    /// | `OLLAMA_AUTOSTART`        | `true`                      |
    /// | `OLLAMA_BIN`              | `ollama`                    |
    /// | `TEMPERATURE`             | `0.2`                       |
    /// | `STOP_SEQUENCES`          | `---`                       |
    /// | `MAX_TOKENS`              | `2000` (`0` = unlimited)    |
    /// | `STOP_PHRASES`            | `Stop when you finish`      |
    /// | `MAX_FRAGMENTS`           | `2000` (`0` = no cap)       |
    /// | `PROGRESS_EVERY`          | `200` (`0` = off)           |
    /// | `TRUNCATION_MARKER`       | `" [truncated]"`            |
    /// | `GENERATION_TIMEOUT_SECS` | `15` (must be > 0)          |
    /// | `MAX_ATTEMPTS`            | `3`                         |
    /// | `RETRY_BACKOFF_SECS`      | `2`                         |
    /// | `SNAPSHOT_EVERY`          | `5`                         |
    /// | `RECORD_DELAY_SECS`       | `2`                         |
    /// | `CHECKPOINT_PATH`         | `processed_ids.txt`         |
    /// | `SNAPSHOT_PATH`           | `results.csv`               |
    /// | `TOKEN_STATUS_PATH`       | unset (disabled)            |
    /// | `CURRENT_RESPONSE_PATH`   | unset (disabled)            |
    /// | `LOG_FILE`                | `output.log`                |
    /// | `SYNC_REPO_DIR`           | unset (sync disabled)       |
    /// | `SYNC_REMOTE_URL`         | required when sync enabled  |
    /// | `SYNC_USERNAME`           | `x-access-token`            |
    /// | `SYNC_TOKEN_VAR`          | `GITHUB_TOKEN`              |
    /// | `SYNC_COMMIT_MESSAGE`     | `Update processed results`  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let lookup = &lookup;

        let task = match env::string_or(lookup, "TASK", "translate").as_str() {
            "translate" => Task::Translate {
                source_column: env::string_or(lookup, "SOURCE_COLUMN", "resume"),
                target_language: env::string_or(lookup, "TARGET_LANGUAGE", "French"),
            },
            "describe-photo" => Task::DescribePhoto {
                image_column: env::string_or(lookup, "IMAGE_COLUMN", "url_img"),
            },
            "summarize-listing" => Task::SummarizeListing {
                descriptions_source: env::required(lookup, "DESCRIPTIONS_SOURCE")?,
                group_column: env::string_or(lookup, "DESCRIPTION_GROUP_COLUMN", "idannonce"),
                description_column: env::string_or(lookup, "DESCRIPTION_COLUMN", "content"),
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "TASK",
                    value: other.to_string(),
                    reason: "expected translate, describe-photo or summarize-listing".into(),
                })
            }
        };

        let max_tokens: u32 = env::parse_or(lookup, "MAX_TOKENS", 2000)?;
        let options = GenerationOptions {
            temperature: env::parse_or(lookup, "TEMPERATURE", 0.2)?,
            stop: env::list_or(lookup, "STOP_SEQUENCES", &["---"]),
            max_tokens: (max_tokens > 0).then_some(max_tokens),
        };

        let max_fragments: usize = env::parse_or(lookup, "MAX_FRAGMENTS", 2000)?;
        let progress_every: usize = env::parse_or(lookup, "PROGRESS_EVERY", 200)?;
        let policy = AccumulatorPolicy {
            stop_phrases: env::list_or(lookup, "STOP_PHRASES", &["Stop when you finish"]),
            max_fragments: (max_fragments > 0).then_some(max_fragments),
            progress_every: (progress_every > 0).then_some(progress_every),
            // Not trimmed: the marker usually starts with a space.
            truncation_marker: lookup("TRUNCATION_MARKER")
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_TRUNCATION_MARKER.to_string()),
        };

        let max_attempts: u32 = env::parse_or(lookup, "MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_ATTEMPTS",
                value: "0".into(),
                reason: "at least one attempt is required".into(),
            });
        }
        let timeout = env::secs_or(lookup, "GENERATION_TIMEOUT_SECS", 15)?;
        if timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "GENERATION_TIMEOUT_SECS",
                value: "0".into(),
                reason: "must be at least one second".into(),
            });
        }
        let retry_backoff = env::secs_or(lookup, "RETRY_BACKOFF_SECS", 2)?;
        let invoker = InvokerConfig {
            timeout,
            max_attempts,
            backoff: BackoffConfig {
                initial_delay: retry_backoff,
                max_delay: retry_backoff.max(Duration::from_secs(60)),
                multiplier: 1.0,
            },
        };

        let snapshot_every: usize = env::parse_or(lookup, "SNAPSHOT_EVERY", 5)?;
        let runner = RunnerConfig {
            snapshot_every: snapshot_every.max(1),
            record_delay: env::secs_or(lookup, "RECORD_DELAY_SECS", 2)?,
        };

        let sync = match env::optional(lookup, "SYNC_REPO_DIR") {
            Some(repo_dir) => Some(GitSyncConfig {
                repo_dir: PathBuf::from(repo_dir),
                remote_url: env::required(lookup, "SYNC_REMOTE_URL")?,
                username: env::string_or(lookup, "SYNC_USERNAME", "x-access-token"),
                token_var: env::string_or(lookup, "SYNC_TOKEN_VAR", "GITHUB_TOKEN"),
                commit_message: env::string_or(
                    lookup,
                    "SYNC_COMMIT_MESSAGE",
                    "Update processed results",
                ),
                timeout: GIT_TIMEOUT,
            }),
            None => None,
        };

        Ok(Self {
            dataset_source: env::required(lookup, "DATASET_SOURCE")?,
            id_column: env::string_or(lookup, "ID_COLUMN", "idannonce"),
            task,
            model: env::string_or(lookup, "MODEL", "qwen2.5:7b"),
            ollama_url: env::string_or(lookup, "OLLAMA_URL", immo_ollama::api::DEFAULT_BASE_URL),
            ollama_autostart: env::flag_or(lookup, "OLLAMA_AUTOSTART", true)?,
            ollama_bin: env::string_or(lookup, "OLLAMA_BIN", "ollama"),
            options,
            policy,
            invoker,
            runner,
            checkpoint_path: env::string_or(lookup, "CHECKPOINT_PATH", "processed_ids.txt").into(),
            snapshot_path: env::string_or(lookup, "SNAPSHOT_PATH", "results.csv").into(),
            token_status_path: env::optional(lookup, "TOKEN_STATUS_PATH").map(PathBuf::from),
            current_response_path: env::optional(lookup, "CURRENT_RESPONSE_PATH").map(PathBuf::from),
            log_file: log_file(lookup),
            sync,
        })
    }
}

/// Heartbeat log path. Read on its own so logging can start before the
/// rest of the configuration is validated.
pub fn log_file<L>(lookup: &L) -> PathBuf
where
    L: Fn(&str) -> Option<String>,
{
    env::string_or(lookup, "LOG_FILE", DEFAULT_LOG_FILE).into()
}
