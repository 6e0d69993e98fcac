//! Helpers for loading typed configuration from environment-style
//! key/value lookups.
//!
//! Binaries call the `from_env` constructors, which delegate to
//! `from_lookup` with `std::env::var`. Tests pass a closure over a
//! `HashMap` instead so they never touch the process environment.

use std::str::FromStr;
use std::time::Duration;

/// Errors raised while reading configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Fetch a required string value.
pub fn required<L>(lookup: &L, key: &'static str) -> Result<String, ConfigError>
where
    L: Fn(&str) -> Option<String>,
{
    optional(lookup, key).ok_or(ConfigError::Missing(key))
}

/// Fetch an optional string value. Blank values count as unset.
pub fn optional<L>(lookup: &L, key: &'static str) -> Option<String>
where
    L: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Fetch a string value, falling back to `default`.
pub fn string_or<L>(lookup: &L, key: &'static str, default: &str) -> String
where
    L: Fn(&str) -> Option<String>,
{
    optional(lookup, key).unwrap_or_else(|| default.to_string())
}

/// Fetch and parse a value, falling back to `default` when unset.
pub fn parse_or<L, T>(lookup: &L, key: &'static str, default: T) -> Result<T, ConfigError>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(lookup, key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Fetch a whole number of seconds as a [`Duration`].
pub fn secs_or<L>(lookup: &L, key: &'static str, default_secs: u64) -> Result<Duration, ConfigError>
where
    L: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default_secs).map(Duration::from_secs)
}

/// Fetch a boolean flag. Accepts `true/false`, `1/0`, `yes/no`.
pub fn flag_or<L>(lookup: &L, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    L: Fn(&str) -> Option<String>,
{
    let Some(raw) = optional(lookup, key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected true or false".into(),
        }),
    }
}

/// Split a comma-separated list, dropping blank entries.
pub fn list_or<L>(lookup: &L, key: &'static str, default: &[&str]) -> Vec<String>
where
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}
