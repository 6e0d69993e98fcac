//! Remote synchronization of the results snapshot.
//!
//! [`GitSync`] shells out to `git` inside a local clone:
//!
//! 1. `git add <file>`
//! 2. `git diff --cached --quiet -- <file>` (exit 1 means staged changes)
//! 3. `git commit -m <message> -- <file>`, only when step 2 found changes
//! 4. `git push <authenticated url> HEAD`, always, so a push that failed
//!    earlier catches up on the cumulative diff
//!
//! The push credential is read from the environment at sync time and
//! scrubbed from anything that ends up in an error or log line.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use immo_core::generation::single_line;
use tokio::process::Command;

/// What a successful sync did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new commit was created and pushed.
    Committed,
    /// The file matched the last commit; only the push ran.
    Unchanged,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{0} environment variable is not set, cannot authenticate push")]
    MissingCredential(String),

    #[error("Remote URL {0:?} is not an http(s) URL")]
    InvalidRemote(String),

    #[error("Cannot resolve {path}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("git {step} failed to start: {source}")]
    Spawn {
        step: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("git {step} timed out after {secs}s")]
    Timeout { step: &'static str, secs: u64 },

    #[error("git {step} exited with status {code}: {stderr}")]
    Git {
        step: &'static str,
        code: i32,
        stderr: String,
    },
}

/// Pushes a local file to a version-controlled remote.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    async fn sync(&self, path: &Path) -> Result<SyncOutcome, SyncError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSyncConfig {
    /// Working tree of the clone that holds the snapshot.
    pub repo_dir: PathBuf,
    /// `https://` URL of the remote, without credentials.
    pub remote_url: String,
    pub username: String,
    /// Name of the environment variable holding the push token.
    pub token_var: String,
    pub commit_message: String,
    /// Bound on each git invocation.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GitSync {
    config: GitSyncConfig,
}

impl GitSync {
    pub fn new(config: GitSyncConfig) -> Self {
        Self { config }
    }

    // ---- private helpers ----

    /// Run one git command in the repository, bounded by the timeout.
    ///
    /// The caller decides what the exit status means.
    async fn git(&self, step: &'static str, args: &[&str], secret: &str) -> Result<Output, SyncError> {
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.config.repo_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // On timeout the output future is dropped, which kills git.
        let output = match tokio::time::timeout(self.config.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(SyncError::Spawn { step, source }),
            Err(_) => {
                return Err(SyncError::Timeout {
                    step,
                    secs: self.config.timeout.as_secs(),
                })
            }
        };

        tracing::debug!(
            step,
            code = output.status.code(),
            stderr = %redact(&String::from_utf8_lossy(&output.stderr), secret),
            "git finished",
        );
        Ok(output)
    }

    async fn git_checked(&self, step: &'static str, args: &[&str], secret: &str) -> Result<(), SyncError> {
        let output = self.git(step, args, secret).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(failure(step, &output, secret))
        }
    }
}

#[async_trait]
impl RemoteSync for GitSync {
    async fn sync(&self, path: &Path) -> Result<SyncOutcome, SyncError> {
        let token = std::env::var(&self.config.token_var)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SyncError::MissingCredential(self.config.token_var.clone()))?;
        let push_url = authenticated_url(&self.config.remote_url, &self.config.username, &token)?;

        let absolute = std::path::absolute(path).map_err(|source| SyncError::Path {
            path: path.to_path_buf(),
            source,
        })?;
        let file = absolute.to_string_lossy().into_owned();
        let file = file.as_str();

        self.git_checked("add", &["add", "--", file], &token).await?;

        let diff = self
            .git("diff", &["diff", "--cached", "--quiet", "--", file], &token)
            .await?;
        let changed = match diff.status.code() {
            Some(0) => false,
            Some(1) => true,
            _ => return Err(failure("diff", &diff, &token)),
        };

        if changed {
            self.git_checked(
                "commit",
                &["commit", "-m", self.config.commit_message.as_str(), "--", file],
                &token,
            )
            .await?;
        }

        self.git_checked("push", &["push", push_url.as_str(), "HEAD"], &token).await?;

        let outcome = if changed {
            SyncOutcome::Committed
        } else {
            SyncOutcome::Unchanged
        };
        tracing::info!(file, ?outcome, "Snapshot synced to remote");
        Ok(outcome)
    }
}

/// Embed `username:token` in an http(s) remote URL.
pub fn authenticated_url(remote: &str, username: &str, token: &str) -> Result<String, SyncError> {
    let (scheme, rest) = remote
        .split_once("://")
        .filter(|(scheme, rest)| matches!(*scheme, "https" | "http") && !rest.is_empty())
        .ok_or_else(|| SyncError::InvalidRemote(remote.to_string()))?;
    // Drop credentials already embedded in the configured URL.
    let host_and_path = rest.rsplit_once('@').map_or(rest, |(_, tail)| tail);
    Ok(format!("{scheme}://{username}:{token}@{host_and_path}"))
}

/// Replace every occurrence of `secret` and fold the text onto one line.
pub fn redact(text: &str, secret: &str) -> String {
    let text = if secret.is_empty() {
        text.to_string()
    } else {
        text.replace(secret, "***")
    };
    single_line(&text)
}

fn failure(step: &'static str, output: &Output, secret: &str) -> SyncError {
    SyncError::Git {
        step,
        code: output.status.code().unwrap_or(-1),
        stderr: redact(&String::from_utf8_lossy(&output.stderr), secret),
    }
}
