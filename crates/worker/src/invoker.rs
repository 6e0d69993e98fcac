//! Timeout-and-retry wrapper around a single generation.
//!
//! Each attempt runs the whole stream consumption on its own spawned
//! task and races it against the attempt timeout. When the deadline
//! wins, the task is aborted and never joined, so a generator stalled
//! mid-stream cannot hold the worker. Every retry starts the generation
//! over; partial text from a failed attempt is dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use immo_core::accumulator::{AccumulatorPolicy, Completion, StreamAccumulator};
use immo_core::generation::{GenerationRequest, Generator, GeneratorError};
use immo_core::snapshot::ProgressWriter;

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 1.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvokerConfig {
    /// Bound on one attempt, from request to final fragment.
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Why a single attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AttemptError {
    #[error("Generation timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error(transparent)]
    Service(#[from] GeneratorError),

    /// The attempt task panicked or was cancelled.
    #[error("Generation task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("Generation exhausted after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: AttemptError,
    },
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub completion: Completion,
    /// 1-based number of the attempt that succeeded.
    pub attempts: u32,
    /// Wall-clock time across all attempts and backoffs.
    pub elapsed: Duration,
}

/// Runs generations with a per-attempt timeout and bounded retries.
pub struct GenerationInvoker {
    generator: Arc<dyn Generator>,
    policy: Arc<AccumulatorPolicy>,
    config: InvokerConfig,
    progress: Option<Arc<ProgressWriter>>,
}

impl GenerationInvoker {
    pub fn new(
        generator: Arc<dyn Generator>,
        policy: Arc<AccumulatorPolicy>,
        config: InvokerConfig,
    ) -> Self {
        Self {
            generator,
            policy,
            config,
            progress: None,
        }
    }

    /// Publish progress snapshots to observability files.
    pub fn with_progress(mut self, progress: ProgressWriter) -> Self {
        self.progress = progress.is_enabled().then(|| Arc::new(progress));
        self
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Generate text for `record_id`, retrying failed attempts.
    pub async fn generate(
        &self,
        record_id: &str,
        request: Arc<GenerationRequest>,
    ) -> Result<GenerationOutcome, InvokeError> {
        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let mut delay = self.config.backoff.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            tracing::info!(record_id, attempt, max_attempts, "Generation attempt started");

            let error = match self.attempt(record_id, &request).await {
                Ok(completion) => {
                    tracing::info!(
                        record_id,
                        attempt,
                        fragments = completion.fragments,
                        reason = ?completion.reason,
                        "Generation attempt finished",
                    );
                    return Ok(GenerationOutcome {
                        completion,
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    });
                }
                Err(e) => e,
            };

            tracing::warn!(record_id, attempt, max_attempts, error = %error, "Generation attempt failed");

            if attempt >= max_attempts {
                return Err(InvokeError::Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }

            tokio::time::sleep(delay).await;
            delay = next_delay(delay, &self.config.backoff);
        }
    }

    // ---- private helpers ----

    async fn attempt(
        &self,
        record_id: &str,
        request: &Arc<GenerationRequest>,
    ) -> Result<Completion, AttemptError> {
        let generator = Arc::clone(&self.generator);
        let request = Arc::clone(request);
        let accumulator = StreamAccumulator::new(record_id, Arc::clone(&self.policy));
        let progress = self.progress.clone();

        if let Some(progress) = &progress {
            progress.begin(record_id);
        }

        let mut handle = tokio::spawn(async move {
            let stream = generator.stream(&request).await?;
            accumulator
                .drain(stream, |snapshot| {
                    tracing::info!(
                        record_id = %snapshot.record_id,
                        fragment_index = snapshot.fragment_index,
                        "Generation in progress",
                    );
                    if let Some(progress) = &progress {
                        progress.record(&snapshot);
                    }
                })
                .await
        });

        match tokio::time::timeout(self.config.timeout, &mut handle).await {
            Ok(Ok(result)) => result.map_err(AttemptError::Service),
            Ok(Err(join_error)) => Err(AttemptError::Aborted(join_error.to_string())),
            Err(_elapsed) => {
                // Abort without awaiting; the stalled stream is dropped
                // whenever the task next yields.
                handle.abort();
                Err(AttemptError::Timeout(self.config.timeout))
            }
        }
    }
}
