//! Dataset loading.
//!
//! The dataset is a CSV file with a header row, read from a local path
//! or downloaded from an http(s) URL. Any failure here is fatal to the
//! worker; it runs once at startup.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;

use immo_core::types::{Record, RecordId};

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Failed to read dataset {location}: {source}")]
    Read {
        location: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to download dataset {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Malformed dataset CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Dataset has no {0:?} column")]
    MissingColumn(String),
}

/// Load every usable record from `source`.
pub async fn load_dataset(source: &str, id_column: &str) -> Result<Vec<Record>, DatasetError> {
    let text = read_source(source).await?;
    let records = parse_dataset(text.as_bytes(), id_column)?;
    tracing::info!(source, records = records.len(), "Dataset loaded");
    Ok(records)
}

/// Load the non-blank `value_column` cells of `source`, grouped by
/// `group_column` and kept in file order.
pub async fn load_grouped(
    source: &str,
    group_column: &str,
    value_column: &str,
) -> Result<HashMap<RecordId, Vec<String>>, DatasetError> {
    let text = read_source(source).await?;
    let groups = parse_grouped(text.as_bytes(), group_column, value_column)?;
    tracing::info!(source, groups = groups.len(), "Grouped dataset loaded");
    Ok(groups)
}

/// Parse CSV text into records keyed by `id_column`.
///
/// Rows with a blank identifier are dropped. When an identifier
/// repeats, the first row wins.
pub fn parse_dataset<R: io::Read>(reader: R, id_column: &str) -> Result<Vec<Record>, DatasetError> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers()?.clone();
    let id_index = headers
        .iter()
        .position(|h| h.trim() == id_column)
        .ok_or_else(|| DatasetError::MissingColumn(id_column.to_string()))?;

    let mut records = Vec::new();
    let mut seen = HashSet::new();
    let mut missing_ids = 0usize;
    let mut duplicates = 0usize;

    for row in reader.records() {
        let row = row?;
        let id = row.get(id_index).map(str::trim).unwrap_or_default();
        if id.is_empty() {
            missing_ids += 1;
            continue;
        }
        if !seen.insert(id.to_string()) {
            duplicates += 1;
            continue;
        }

        let fields: BTreeMap<String, String> = headers
            .iter()
            .zip(row.iter())
            .map(|(h, v)| (h.trim().to_string(), v.to_string()))
            .collect();
        records.push(Record::new(id, fields));
    }

    if missing_ids > 0 {
        tracing::warn!(rows = missing_ids, id_column, "Dropped rows without an identifier");
    }
    if duplicates > 0 {
        tracing::warn!(rows = duplicates, id_column, "Dropped rows with a duplicate identifier");
    }

    Ok(records)
}

/// Group the `value_column` cells of CSV text by `group_column`.
///
/// Rows with a blank group key or a blank value are dropped.
pub fn parse_grouped<R: io::Read>(
    reader: R,
    group_column: &str,
    value_column: &str,
) -> Result<HashMap<RecordId, Vec<String>>, DatasetError> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
    };
    let group_index = column(group_column)?;
    let value_index = column(value_column)?;

    let mut groups: HashMap<RecordId, Vec<String>> = HashMap::new();
    let mut dropped = 0usize;
    for row in reader.records() {
        let row = row?;
        let key = row.get(group_index).map(str::trim).unwrap_or_default();
        let value = row.get(value_index).map(str::trim).unwrap_or_default();
        if key.is_empty() || value.is_empty() {
            dropped += 1;
            continue;
        }
        groups.entry(key.to_string()).or_default().push(value.to_string());
    }

    if dropped > 0 {
        tracing::warn!(
            rows = dropped,
            group_column,
            value_column,
            "Dropped rows without a key or value",
        );
    }

    Ok(groups)
}

// ---- private helpers ----

async fn read_source(source: &str) -> Result<String, DatasetError> {
    if is_url(source) {
        return download(source).await;
    }
    tokio::fs::read_to_string(source)
        .await
        .map_err(|e| DatasetError::Read {
            location: source.to_string(),
            source: e,
        })
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

async fn download(url: &str) -> Result<String, DatasetError> {
    let download_error = |reason: String| DatasetError::Download {
        url: url.to_string(),
        reason,
    };

    let response = reqwest::get(url)
        .await
        .map_err(|e| download_error(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(download_error(format!("HTTP {status}")));
    }
    response.text().await.map_err(|e| download_error(e.to_string()))
}
