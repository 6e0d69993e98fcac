use std::path::PathBuf;
use std::time::Duration;

use immo_core::env::{self, ConfigError};

use crate::restart::is_safe_pattern;

/// Watchdog configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Program and arguments used to (re)launch the worker.
    pub worker_command: Vec<String>,
    /// `pkill -f` pattern identifying running workers.
    pub worker_pattern: String,
    /// Heartbeat log written by the worker.
    pub log_file: PathBuf,
    pub poll_interval: Duration,
    pub stale_after: Duration,
    /// Pause between terminating and relaunching.
    pub restart_grace: Duration,
}

impl WatchdogConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var              | Default              |
    /// |----------------------|----------------------|
    /// | `WORKER_COMMAND`     | required             |
    /// | `WORKER_PATTERN`     | `WORKER_COMMAND`     |
    /// | `LOG_FILE`           | `output.log`         |
    /// | `POLL_INTERVAL_SECS` | `60`                 |
    /// | `STALE_AFTER_SECS`   | `60`                 |
    /// | `RESTART_GRACE_SECS` | `5`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let lookup = &lookup;

        let worker_command: Vec<String> = env::required(lookup, "WORKER_COMMAND")?
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let worker_pattern = env::optional(lookup, "WORKER_PATTERN")
            .unwrap_or_else(|| worker_command.join(" "));
        if !is_safe_pattern(&worker_pattern) {
            return Err(ConfigError::Invalid {
                key: "WORKER_PATTERN",
                value: worker_pattern,
                reason: "pattern must be a single non-blank line".into(),
            });
        }

        let poll_interval = env::secs_or(lookup, "POLL_INTERVAL_SECS", 60)?;
        if poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "POLL_INTERVAL_SECS",
                value: "0".into(),
                reason: "must be at least one second".into(),
            });
        }

        Ok(Self {
            worker_command,
            worker_pattern,
            log_file: env::string_or(lookup, "LOG_FILE", "output.log").into(),
            poll_interval,
            stale_after: env::secs_or(lookup, "STALE_AFTER_SECS", 60)?,
            restart_grace: env::secs_or(lookup, "RESTART_GRACE_SECS", 5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<WatchdogConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WatchdogConfig::from_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn pattern_defaults_to_command() {
        let config = config(&[("WORKER_COMMAND", "/opt/immo/immo-worker  --verbose")]).unwrap();
        assert_eq!(config.worker_command, vec!["/opt/immo/immo-worker", "--verbose"]);
        assert_eq!(config.worker_pattern, "/opt/immo/immo-worker --verbose");
        assert_eq!(config.log_file, PathBuf::from("output.log"));
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.stale_after, Duration::from_secs(60));
        assert_eq!(config.restart_grace, Duration::from_secs(5));
    }

    #[test]
    fn command_is_required() {
        assert_matches!(config(&[]), Err(ConfigError::Missing("WORKER_COMMAND")));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = config(&[("WORKER_COMMAND", "immo-worker"), ("POLL_INTERVAL_SECS", "0")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { key: "POLL_INTERVAL_SECS", .. });
    }
}
