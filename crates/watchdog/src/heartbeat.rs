//! Heartbeat extraction from the worker's log file.
//!
//! The heartbeat is the leading timestamp of the last non-empty line.
//! Only the tail of the file is read, so a log of any size costs the
//! same to check. Two timestamp shapes are accepted:
//!
//! | Shape                        | Example                          | Zone  |
//! |------------------------------|----------------------------------|-------|
//! | RFC 3339 (worker `fmt` layer)| `2026-10-16T08:15:02.123456Z`    | as written |
//! | Legacy `asctime`             | `2026-10-16 08:15:02,123`        | local |

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

/// Initial tail window; doubled until a whole line fits.
const TAIL_WINDOW: u64 = 4 * 1024;

const LEGACY_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Last non-empty line of `path`, without its line terminator.
///
/// Returns `Ok(None)` for an empty or whitespace-only file.
pub fn read_last_line(path: &Path) -> io::Result<Option<String>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let mut window = TAIL_WINDOW;

    loop {
        let start = len.saturating_sub(window);
        file.seek(SeekFrom::Start(start))?;
        let mut buf = Vec::with_capacity((len - start) as usize);
        file.by_ref().take(len - start).read_to_end(&mut buf)?;

        let at_file_start = start == 0;
        let Some(end) = buf.iter().rposition(|b| !b.is_ascii_whitespace()) else {
            if at_file_start {
                return Ok(None);
            }
            window = window.saturating_mul(2);
            continue;
        };

        match buf[..end].iter().rposition(|b| *b == b'\n') {
            Some(newline) => {
                return Ok(Some(String::from_utf8_lossy(&buf[newline + 1..=end]).into_owned()));
            }
            None if at_file_start => {
                return Ok(Some(String::from_utf8_lossy(&buf[..=end]).into_owned()));
            }
            None => window = window.saturating_mul(2),
        }
    }
}

/// Parse the leading timestamp of a log line.
pub fn parse_heartbeat(line: &str) -> Option<DateTime<Utc>> {
    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;

    if let Ok(ts) = DateTime::parse_from_rfc3339(first) {
        return Some(ts.with_timezone(&Utc));
    }

    let second = tokens.next()?;
    let naive = NaiveDateTime::parse_from_str(&format!("{first} {second}"), LEGACY_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Heartbeat of the log at `path`, if one can be read and parsed.
///
/// A missing file, an empty file and an unparsable last line all come
/// back as `None`.
pub fn last_heartbeat(path: &Path) -> Option<DateTime<Utc>> {
    let line = match read_last_line(path) {
        Ok(Some(line)) => line,
        Ok(None) => {
            tracing::debug!(path = %path.display(), "Log file is empty");
            return None;
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Log file unreadable");
            return None;
        }
    };

    let heartbeat = parse_heartbeat(&line);
    if heartbeat.is_none() {
        tracing::debug!(path = %path.display(), "Last log line has no timestamp");
    }
    heartbeat
}

/// Whether the worker should be considered stalled at `now`.
///
/// No heartbeat counts as stalled. A heartbeat from the future (clock
/// skew) does not.
pub fn is_stalled(heartbeat: Option<DateTime<Utc>>, now: DateTime<Utc>, threshold: Duration) -> bool {
    let Some(heartbeat) = heartbeat else {
        return true;
    };
    match (now - heartbeat).to_std() {
        Ok(age) => age > threshold,
        Err(_) => false,
    }
}
