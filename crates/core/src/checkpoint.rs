//! Append-only record of identifiers that have been fully processed.
//!
//! The backing file holds one identifier per line. It is read once when
//! the store is opened and only ever appended to afterwards, so a kill
//! in the middle of a write can at worst leave a torn final line. That
//! line is fenced off with a newline before the next append.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::types::RecordId;

/// Errors from appending to the checkpoint file.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Failed to append to checkpoint file {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Identifier {0:?} cannot be checkpointed (empty or multi-line)")]
    InvalidId(String),
}

/// Durable set of processed identifiers.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    processed: HashSet<RecordId>,
    /// Set when the file did not end with a newline at open time.
    torn_tail: bool,
}

impl CheckpointStore {
    /// Load the store from `path`.
    ///
    /// A missing or unreadable file is treated as "nothing processed
    /// yet"; this never fails.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (processed, torn_tail) = match fs::read_to_string(&path) {
            Ok(contents) => {
                let torn = !contents.is_empty() && !contents.ends_with('\n');
                let ids = contents
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect::<HashSet<_>>();
                (ids, torn)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No checkpoint file yet, starting fresh");
                (HashSet::new(), false)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Checkpoint file unreadable, treating as empty",
                );
                (HashSet::new(), false)
            }
        };

        tracing::info!(
            path = %path.display(),
            processed = processed.len(),
            "Checkpoint store loaded",
        );

        Self {
            path,
            processed,
            torn_tail,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.processed.contains(id)
    }

    /// Append `id` to the file and the in-memory set.
    ///
    /// The in-memory set is only updated once the line has been written.
    /// Marking an already-processed id is a no-op.
    pub fn mark_processed(&mut self, id: &str) -> Result<(), CheckpointError> {
        let id = id.trim();
        if id.is_empty() || id.contains(['\n', '\r']) {
            return Err(CheckpointError::InvalidId(id.to_string()));
        }
        if self.processed.contains(id) {
            return Ok(());
        }

        let mut line = String::with_capacity(id.len() + 2);
        if self.torn_tail {
            line.push('\n');
        }
        line.push_str(id);
        line.push('\n');

        self.append(line.as_bytes())
            .map_err(|source| CheckpointError::Append {
                path: self.path.clone(),
                source,
            })?;

        self.torn_tail = false;
        self.processed.insert(id.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    fn append(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        // Single write so the line lands whole or not at all in practice.
        file.write_all(bytes)?;
        file.sync_data()
    }
}
