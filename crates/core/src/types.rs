//! Record model shared by the worker and the snapshot layer.

use std::collections::BTreeMap;
use std::time::Duration;

/// Stable unique identifier of a dataset row (e.g. a listing id).
pub type RecordId = String;

/// One unit of work: a dataset row plus the result produced for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    /// Source columns keyed by header name.
    pub fields: BTreeMap<String, String>,
    /// Final generated text. `None` until a completion is attached.
    pub result: Option<String>,
    /// Wall-clock time spent generating `result`, retries included.
    pub elapsed: Option<Duration>,
}

impl Record {
    pub fn new(id: impl Into<RecordId>, fields: BTreeMap<String, String>) -> Self {
        Self {
            id: id.into(),
            fields,
            result: None,
            elapsed: None,
        }
    }

    /// Value of a source column, ignoring blank cells.
    pub fn field(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Whether a non-empty result has been attached.
    pub fn is_completed(&self) -> bool {
        self.result.as_deref().is_some_and(|r| !r.is_empty())
    }
}
