//! Token-stream accumulation with early-stop and truncation policies.
//!
//! [`StreamAccumulator`] receives the fragments of one generation, one
//! at a time, and decides after every fragment whether the result is
//! final. The checks run in a fixed order:
//!
//! 1. **Stop phrase** -- the accumulated text contains a configured
//!    sentinel. The result is the trimmed text before its first
//!    occurrence and the rest of the stream is discarded.
//! 2. **Length cap** -- more fragments arrived than the configured
//!    maximum. The result is the text of the first `max_fragments`
//!    fragments followed by the truncation marker.
//!
//! If the upstream ends before either fires, the full text is the
//! result. Checking on every push bounds memory and time even when the
//! upstream never terminates on its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};

use crate::types::RecordId;

/// Default text appended to capped results.
pub const DEFAULT_TRUNCATION_MARKER: &str = " [truncated]";

/// Stop and truncation settings shared by every accumulation.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatorPolicy {
    /// Sentinel phrases that end the generation early.
    pub stop_phrases: Vec<String>,
    /// Maximum number of fragments kept. `None` disables the cap.
    pub max_fragments: Option<usize>,
    /// Take a [`ProgressSnapshot`] every this many fragments.
    pub progress_every: Option<usize>,
    /// Appended to capped results so they can be told apart.
    pub truncation_marker: String,
}

impl Default for AccumulatorPolicy {
    fn default() -> Self {
        Self {
            stop_phrases: Vec::new(),
            max_fragments: None,
            progress_every: None,
            truncation_marker: DEFAULT_TRUNCATION_MARKER.to_string(),
        }
    }
}

impl AccumulatorPolicy {
    fn longest_stop_phrase(&self) -> usize {
        self.stop_phrases.iter().map(String::len).max().unwrap_or(0)
    }
}

/// Why an accumulation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    StopPhrase,
    LengthCap,
    EndOfStream,
}

/// Final text of one accumulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Fragments that contributed to `text`.
    pub fragments: usize,
    pub reason: FinishReason,
}

impl Completion {
    pub fn is_truncated(&self) -> bool {
        self.reason == FinishReason::LengthCap
    }
}

/// Intermediate view of a long generation, for external observability.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub record_id: RecordId,
    /// 1-based index of the fragment that triggered the snapshot.
    pub fragment_index: usize,
    pub last_fragment: String,
    pub partial_text: String,
    pub taken_at: DateTime<Utc>,
}

/// Outcome of pushing one fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Continue,
    Progress(ProgressSnapshot),
    Finished(Completion),
}

/// Accumulates the fragments of a single generation.
#[derive(Debug)]
pub struct StreamAccumulator {
    record_id: RecordId,
    policy: Arc<AccumulatorPolicy>,
    text: String,
    fragments: usize,
    finished: bool,
}

impl StreamAccumulator {
    pub fn new(record_id: impl Into<RecordId>, policy: Arc<AccumulatorPolicy>) -> Self {
        Self {
            record_id: record_id.into(),
            policy,
            text: String::new(),
            fragments: 0,
            finished: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Append one fragment and evaluate the stop policies.
    ///
    /// Once [`Step::Finished`] has been returned, further pushes are
    /// ignored.
    pub fn push(&mut self, fragment: &str) -> Step {
        if self.finished {
            return Step::Continue;
        }

        let previous_len = self.text.len();
        self.text.push_str(fragment);
        self.fragments += 1;

        if let Some(cut) = self.find_stop_phrase(previous_len) {
            let text = self.text[..cut].trim().to_string();
            return self.finish_with(text, self.fragments, FinishReason::StopPhrase);
        }

        if let Some(max) = self.policy.max_fragments {
            if self.fragments > max {
                self.text.truncate(previous_len);
                let mut text = std::mem::take(&mut self.text);
                text.push_str(&self.policy.truncation_marker);
                return self.finish_with(text, max, FinishReason::LengthCap);
            }
        }

        match self.policy.progress_every {
            Some(every) if every > 0 && self.fragments % every == 0 => {
                Step::Progress(ProgressSnapshot {
                    record_id: self.record_id.clone(),
                    fragment_index: self.fragments,
                    last_fragment: fragment.to_string(),
                    partial_text: self.text.clone(),
                    taken_at: Utc::now(),
                })
            }
            _ => Step::Continue,
        }
    }

    /// Close the accumulation because the upstream ended.
    pub fn finish(self) -> Completion {
        Completion {
            text: self.text,
            fragments: self.fragments,
            reason: FinishReason::EndOfStream,
        }
    }

    /// Drive the accumulator over a synchronous fragment source.
    ///
    /// Stops pulling from `fragments` as soon as a policy fires.
    pub fn consume<I, F>(mut self, fragments: I, mut on_progress: F) -> Completion
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        F: FnMut(ProgressSnapshot),
    {
        for fragment in fragments {
            match self.push(fragment.as_ref()) {
                Step::Continue => {}
                Step::Progress(snapshot) => on_progress(snapshot),
                Step::Finished(completion) => return completion,
            }
        }
        self.finish()
    }

    /// Drive the accumulator over an async fragment stream.
    ///
    /// The stream is dropped as soon as a policy fires, which abandons
    /// whatever the upstream had left to send. The first stream error
    /// aborts the accumulation.
    pub async fn drain<S, E, F>(mut self, stream: S, mut on_progress: F) -> Result<Completion, E>
    where
        S: Stream<Item = Result<String, E>>,
        F: FnMut(ProgressSnapshot),
    {
        let mut stream = std::pin::pin!(stream);
        while let Some(item) = stream.next().await {
            match self.push(&item?) {
                Step::Continue => {}
                Step::Progress(snapshot) => on_progress(snapshot),
                Step::Finished(completion) => return Ok(completion),
            }
        }
        Ok(self.finish())
    }

    fn finish_with(&mut self, text: String, fragments: usize, reason: FinishReason) -> Step {
        self.finished = true;
        self.text.clear();
        Step::Finished(Completion {
            text,
            fragments,
            reason,
        })
    }

    /// Byte offset of the earliest stop phrase, if any.
    ///
    /// Earlier pushes already ruled out matches lying wholly inside the
    /// old text, so only the tail that could overlap the new fragment
    /// is searched.
    fn find_stop_phrase(&self, previous_len: usize) -> Option<usize> {
        let longest = self.policy.longest_stop_phrase();
        if longest == 0 {
            return None;
        }

        let mut start = previous_len.saturating_sub(longest - 1);
        while !self.text.is_char_boundary(start) {
            start -= 1;
        }
        let window = &self.text[start..];

        self.policy
            .stop_phrases
            .iter()
            .filter(|phrase| !phrase.is_empty())
            .filter_map(|phrase| window.find(phrase.as_str()))
            .min()
            .map(|offset| start + offset)
    }
}
