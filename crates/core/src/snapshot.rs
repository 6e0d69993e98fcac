//! CSV snapshots of completed results and live progress files.
//!
//! [`SnapshotWriter`] projects every completed [`Record`] to a CSV file.
//! The file is written next to its final location and renamed into
//! place, so a kill mid-write leaves the previous snapshot intact.
//!
//! [`ProgressWriter`] maintains two optional side files that only exist
//! so a human can watch a long stream: the latest token, and the growing
//! partial response of the record being generated.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::accumulator::ProgressSnapshot;
use crate::types::Record;

/// Errors from writing or reading snapshot files.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl SnapshotError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One row of the results snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub id: String,
    pub result: String,
    pub elapsed_secs: Option<f64>,
}

impl SnapshotRow {
    fn from_record(record: &Record) -> Option<Self> {
        let result = record.result.as_deref().filter(|r| !r.is_empty())?;
        Some(Self {
            id: record.id.clone(),
            result: result.to_string(),
            elapsed_secs: record
                .elapsed
                .map(|d| (d.as_secs_f64() * 1000.0).round() / 1000.0),
        })
    }
}

/// Summary of a snapshot write.
#[derive(Debug, Clone, PartialEq)]
pub struct Written {
    pub path: PathBuf,
    pub rows: usize,
}

/// Writes the completed subset of the records to a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the snapshot with every record that has a non-empty
    /// result, in record order.
    pub fn snapshot(&self, records: &[Record]) -> Result<Written, SnapshotError> {
        let rows: Vec<SnapshotRow> = records.iter().filter_map(SnapshotRow::from_record).collect();

        write_atomically(&self.path, |file| {
            let mut writer = csv::Writer::from_writer(file);
            for row in &rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|e| csv::Error::from(e.into_error()))
        })?;

        tracing::info!(path = %self.path.display(), rows = rows.len(), "Snapshot written");

        Ok(Written {
            path: self.path.clone(),
            rows: rows.len(),
        })
    }

    /// Read back a snapshot written by [`snapshot`](Self::snapshot).
    pub fn load(&self) -> Result<Vec<SnapshotRow>, SnapshotError> {
        load_snapshot(&self.path)
    }
}

/// Read every row of a results snapshot.
pub fn load_snapshot(path: &Path) -> Result<Vec<SnapshotRow>, SnapshotError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| SnapshotError::csv(path, e))?;
    reader
        .deserialize()
        .collect::<Result<Vec<SnapshotRow>, _>>()
        .map_err(|e| SnapshotError::csv(path, e))
}

#[derive(Debug, Serialize)]
struct TokenStatusRow<'a> {
    fragment_index: usize,
    record_id: &'a str,
    token: &'a str,
    time: String,
}

#[derive(Debug, Serialize)]
struct ResponseRow<'a> {
    fragment_index: usize,
    record_id: &'a str,
    response: &'a str,
    time: String,
}

const RESPONSE_HEADER: [&str; 4] = ["fragment_index", "record_id", "response", "time"];

/// Observability files refreshed from [`ProgressSnapshot`]s.
///
/// Failures here are logged and swallowed; they never affect the
/// generation they describe.
#[derive(Debug, Clone, Default)]
pub struct ProgressWriter {
    token_status: Option<PathBuf>,
    current_response: Option<PathBuf>,
}

impl ProgressWriter {
    pub fn new(token_status: Option<PathBuf>, current_response: Option<PathBuf>) -> Self {
        Self {
            token_status,
            current_response,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token_status.is_some() || self.current_response.is_some()
    }

    /// Reset the current-response file for a new record.
    pub fn begin(&self, record_id: &str) {
        let Some(path) = &self.current_response else {
            return;
        };
        let result = write_atomically(path, |file| {
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(RESPONSE_HEADER)?;
            writer
                .into_inner()
                .map_err(|e| csv::Error::from(e.into_error()))
        });
        if let Err(e) = result {
            tracing::warn!(record_id, error = %e, "Failed to reset current response file");
        }
    }

    /// Publish a progress snapshot to both files.
    pub fn record(&self, snapshot: &ProgressSnapshot) {
        let time = snapshot.taken_at.to_rfc3339();

        if let Some(path) = &self.token_status {
            let row = TokenStatusRow {
                fragment_index: snapshot.fragment_index,
                record_id: &snapshot.record_id,
                token: &snapshot.last_fragment,
                time: time.clone(),
            };
            let result = write_atomically(path, |file| {
                let mut writer = csv::Writer::from_writer(file);
                writer.serialize(&row)?;
                writer
                    .into_inner()
                    .map_err(|e| csv::Error::from(e.into_error()))
            });
            if let Err(e) = result {
                tracing::warn!(record_id = %snapshot.record_id, error = %e, "Failed to write token status");
            }
        }

        if let Some(path) = &self.current_response {
            let row = ResponseRow {
                fragment_index: snapshot.fragment_index,
                record_id: &snapshot.record_id,
                response: &snapshot.partial_text,
                time,
            };
            if let Err(e) = append_row(path, &row) {
                tracing::warn!(record_id = %snapshot.record_id, error = %e, "Failed to append current response");
            }
        }
    }
}

fn append_row<T: Serialize>(path: &Path, row: &T) -> Result<(), SnapshotError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SnapshotError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer.serialize(row).map_err(|e| SnapshotError::csv(path, e))?;
    writer.flush().map_err(|e| SnapshotError::io(path, e))
}

/// Write `path` through a sibling temp file and rename it into place.
fn write_atomically<F>(path: &Path, write: F) -> Result<(), SnapshotError>
where
    F: FnOnce(File) -> Result<File, csv::Error>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SnapshotError::io(parent, e))?;
    }

    let tmp = temp_path(path);
    let file = File::create(&tmp).map_err(|e| SnapshotError::io(&tmp, e))?;
    let file = match write(file) {
        Ok(file) => file,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(SnapshotError::csv(&tmp, e));
        }
    };
    file.sync_all().map_err(|e| SnapshotError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| SnapshotError::io(path, e))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("snapshot"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use chrono::Utc;

    use super::*;

    fn record(id: &str, result: Option<&str>) -> Record {
        let mut record = Record::new(id, BTreeMap::new());
        record.result = result.map(str::to_string);
        record
    }

    #[test]
    fn snapshot_round_trip_keeps_completed_only() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let writer = SnapshotWriter::new(dir.path().join("out/results.csv"));

        let mut b = record("B", Some("bonjour, \"le\" monde\nsur deux lignes"));
        b.elapsed = Some(Duration::from_millis(1534));
        let records = vec![record("A", None), b, record("C", Some("")), record("D", Some("salut"))];

        let written = writer.snapshot(&records).unwrap();
        assert_eq!(written.rows, 2);

        let rows = writer.load().unwrap();
        let mapping: Vec<(&str, &str)> = rows.iter().map(|r| (r.id.as_str(), r.result.as_str())).collect();
        assert_eq!(
            mapping,
            vec![("B", "bonjour, \"le\" monde\nsur deux lignes"), ("D", "salut")]
        );
        assert_eq!(rows[0].elapsed_secs, Some(1.534));
        assert_eq!(rows[1].elapsed_secs, None);
    }

    #[test]
    fn snapshot_overwrites_previous_content() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let writer = SnapshotWriter::new(dir.path().join("results.csv"));

        writer.snapshot(&[record("A", Some("un")), record("B", Some("deux"))]).unwrap();
        writer.snapshot(&[record("C", Some("trois"))]).unwrap();

        let rows = writer.load().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "C");
        assert!(!temp_path(writer.path()).exists());
    }

    #[test]
    fn empty_snapshot_is_readable() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let writer = SnapshotWriter::new(dir.path().join("results.csv"));
        writer.snapshot(&[record("A", None)]).unwrap();
        assert!(writer.load().unwrap().is_empty());
    }

    #[test]
    fn load_missing_snapshot_fails() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let err = load_snapshot(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, SnapshotError::Csv { .. }));
    }

    #[test]
    fn progress_files_track_latest_state() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let token_path = dir.path().join("token_status.csv");
        let response_path = dir.path().join("current_response.csv");
        let progress = ProgressWriter::new(Some(token_path.clone()), Some(response_path.clone()));

        progress.begin("B");
        for (index, text) in [(200, "Bonj"), (400, "Bonjour à")] {
            progress.record(&ProgressSnapshot {
                record_id: "B".into(),
                fragment_index: index,
                last_fragment: "x".into(),
                partial_text: text.into(),
                taken_at: Utc::now(),
            });
        }

        let tokens = fs::read_to_string(&token_path).unwrap();
        assert!(tokens.starts_with("fragment_index,record_id,token,time\n400,B,x,"));

        let mut reader = csv::Reader::from_path(&response_path).unwrap();
        let responses: Vec<String> = reader
            .records()
            .map(|r| r.unwrap().get(2).unwrap().to_string())
            .collect();
        assert_eq!(responses, vec!["Bonj", "Bonjour à"]);

        progress.begin("C");
        let mut reader = csv::Reader::from_path(&response_path).unwrap();
        assert_eq!(reader.records().count(), 0);
    }

    #[test]
    fn disabled_progress_writer_is_inert() {
        let progress = ProgressWriter::default();
        assert!(!progress.is_enabled());
        progress.begin("A");
    }
}
