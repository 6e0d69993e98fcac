//! Tracing setup for the worker binary.
//!
//! Two `fmt` layers share one filter: a human-readable layer on stdout
//! and a plain-text layer appending to the heartbeat log. Every line in
//! the log starts with an RFC 3339 UTC timestamp, which is what the
//! watchdog reads to decide whether the worker is alive.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "immo_worker=info,immo_core=info,immo_ollama=info";

/// Install the global subscriber. Fails if the log file cannot be opened.
pub fn init(log_file: &Path) -> anyhow::Result<()> {
    if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("opening log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(fmt::layer())
        .with(heartbeat_layer(file))
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(())
}

/// Plain-text layer writing one timestamped line per event to `file`.
pub fn heartbeat_layer<S>(file: File) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer().with_ansi(false).with_writer(Mutex::new(file))
}
