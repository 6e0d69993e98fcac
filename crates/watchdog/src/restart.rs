//! Worker process control.
//!
//! Stalled workers are found by command-line pattern with `pkill -f`
//! (so a worker started by a previous watchdog instance is caught too)
//! and relaunched from the configured command.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

/// Upper bound on a `pkill` invocation.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest pattern accepted for `pkill -f`.
const MAX_PATTERN_LEN: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum RestartError {
    #[error("Refusing to match processes with pattern {0:?}")]
    UnsafePattern(String),

    #[error("Worker command is empty")]
    EmptyCommand,

    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("{program} failed (exit {code}): {stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },
}

/// A pattern that is blank or spans lines would match far more than
/// the worker (`pkill -f ""` matches every process).
pub fn is_safe_pattern(pattern: &str) -> bool {
    !pattern.trim().is_empty()
        && pattern.len() <= MAX_PATTERN_LEN
        && !pattern.contains(['\n', '\r', '\0'])
}

/// Send SIGTERM to every process whose command line matches `pattern`.
///
/// Returns whether anything matched. `pkill` exit status 1 means no
/// process matched, which is not an error.
pub async fn terminate_matching(pattern: &str) -> Result<bool, RestartError> {
    if !is_safe_pattern(pattern) {
        return Err(RestartError::UnsafePattern(pattern.to_string()));
    }

    tracing::info!(pattern, "Terminating worker processes");

    let program = "pkill".to_string();
    let result = tokio::time::timeout(
        TERMINATE_TIMEOUT,
        Command::new(&program)
            .args(["-f", pattern])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match result {
        Ok(Ok(output)) => match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => Err(RestartError::Failed {
                program,
                code: code.unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().replace('\n', " | "),
            }),
        },
        Ok(Err(source)) => Err(RestartError::Spawn { program, source }),
        Err(_) => Err(RestartError::Timeout {
            program,
            timeout: TERMINATE_TIMEOUT,
        }),
    }
}

/// Start the worker detached from the watchdog's stdio.
///
/// The worker writes its own log file; its stdout and stderr are
/// discarded.
pub fn launch(command: &[String]) -> Result<Child, RestartError> {
    let (program, args) = command.split_first().ok_or(RestartError::EmptyCommand)?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| RestartError::Spawn {
            program: program.clone(),
            source,
        })?;

    tracing::info!(program = %program, pid = child.id(), "Worker launched");
    Ok(child)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn safe_patterns() {
        assert!(is_safe_pattern("immo-worker"));
        assert!(is_safe_pattern("python translate_listings.py"));
        assert!(is_safe_pattern("/opt/immo/bin/immo-worker --dataset x.csv"));
    }

    #[test]
    fn unsafe_patterns() {
        assert!(!is_safe_pattern(""));
        assert!(!is_safe_pattern("   "));
        assert!(!is_safe_pattern("immo-worker\nsshd"));
        assert!(!is_safe_pattern(&"a".repeat(2000)));
    }

    #[tokio::test]
    async fn blank_pattern_is_refused_without_running_pkill() {
        let err = terminate_matching(" ").await.unwrap_err();
        assert_matches!(err, RestartError::UnsafePattern(_));
    }

    #[test]
    fn empty_command_cannot_launch() {
        assert_matches!(launch(&[]), Err(RestartError::EmptyCommand));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let err = launch(&["immo-no-such-worker-binary".to_string()]).unwrap_err();
        assert_matches!(err, RestartError::Spawn { program, .. } if program == "immo-no-such-worker-binary");
    }
}
