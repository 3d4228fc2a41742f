//! # Git Revision Source
//!
//! Keeps a local checkout per target in sync with its remote branch using the
//! `git` command line, authenticated through the host's SSH agent and
//! known_hosts.

use super::{FetchError, Observation, RevisionSource};
use crate::task::Target;
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

const SSH_AUTH_SOCK: &str = "SSH_AUTH_SOCK";

/// How git authenticates against remotes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitAuth {
    /// Forward the SSH agent socket to git
    SshAgent { socket: PathBuf },
    /// Strip agent access; only anonymous or credential-helper remotes work
    Disabled,
}

impl GitAuth {
    /// Detect the running SSH agent
    ///
    /// Fails when `SSH_AUTH_SOCK` is unset or points nowhere, mirroring an
    /// agent connection failure.
    pub fn ssh_agent() -> Result<Self, FetchError> {
        let socket = std::env::var_os(SSH_AUTH_SOCK)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| {
                FetchError::Setup("SSH_AUTH_SOCK is not set, is ssh-agent running?".to_string())
            })?;
        if !socket.exists() {
            return Err(FetchError::Setup(format!(
                "SSH agent socket {} does not exist",
                socket.display()
            )));
        }
        Ok(GitAuth::SshAgent { socket })
    }
}

/// Classify a failed git invocation from its stderr
///
/// Authentication and host verification problems will not fix themselves
/// and are reported as setup failures; everything else is transient.
pub fn classify_git_failure(stderr: &str) -> FetchError {
    let message = stderr.trim().to_string();
    let lower = message.to_lowercase();
    let is_auth = lower.contains("permission denied")
        || lower.contains("authentication failed")
        || lower.contains("host key verification failed")
        || lower.contains("could not read username")
        || lower.contains("invalid username or password");
    if is_auth {
        FetchError::Setup(message)
    } else {
        FetchError::Transient(message)
    }
}

fn is_missing_branch(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("couldn't find remote ref")
        || (lower.contains("remote branch") && lower.contains("not found"))
}

/// [`RevisionSource`] backed by local git checkouts under `base_dir`
#[derive(Debug, Clone)]
pub struct GitSource {
    base_dir: PathBuf,
    auth: GitAuth,
    program: PathBuf,
}

impl GitSource {
    pub fn new(base_dir: impl Into<PathBuf>, auth: GitAuth) -> Self {
        Self {
            base_dir: base_dir.into(),
            auth,
            program: PathBuf::from("git"),
        }
    }

    #[cfg(test)]
    fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    async fn git<I, S>(&self, cwd: Option<&Path>, args: I) -> Result<String, GitFailure>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        if let Some(cwd) = cwd {
            command.arg("-C").arg(cwd);
        }
        // a fetch abandoned on cancellation must not keep writing the checkout
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        match &self.auth {
            GitAuth::SshAgent { socket } => {
                command.env(SSH_AUTH_SOCK, socket);
            }
            GitAuth::Disabled => {
                command.env_remove(SSH_AUTH_SOCK);
            }
        }

        let output = command
            .output()
            .await
            .map_err(|e| GitFailure::Spawn(format!("failed to execute git: {e}")))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(GitFailure::Exit(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn clone_target(&self, target: &Target, checkout: &Path) -> Result<Observation, FetchError> {
        tokio::fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            FetchError::Setup(format!(
                "failed to create checkout directory {}: {e}",
                self.base_dir.display()
            ))
        })?;

        info!(stack = %target.name, url = %target.url, "cloning target");
        let cloned = self
            .git(
                None,
                [
                    OsStr::new("clone"),
                    OsStr::new("--quiet"),
                    OsStr::new("--single-branch"),
                    OsStr::new("--branch"),
                    OsStr::new(&target.branch),
                    OsStr::new(&target.url),
                    checkout.as_os_str(),
                ],
            )
            .await;

        match cloned {
            Ok(_) => self.head(checkout).await,
            Err(GitFailure::Exit(stderr)) if is_missing_branch(&stderr) => {
                discard_checkout(checkout).await;
                Ok(Observation::Gone)
            }
            Err(failure) => {
                discard_checkout(checkout).await;
                Err(failure.into_fetch_error())
            }
        }
    }

    async fn update_target(&self, target: &Target, checkout: &Path) -> Result<Observation, FetchError> {
        debug!(stack = %target.name, branch = %target.branch, "fetching target");
        let fetched = self
            .git(Some(checkout), ["fetch", "--quiet", "origin", target.branch.as_str()])
            .await;
        match fetched {
            Ok(_) => {}
            Err(GitFailure::Exit(stderr)) if is_missing_branch(&stderr) => {
                return Ok(Observation::Gone)
            }
            Err(failure) => return Err(failure.into_fetch_error()),
        }

        self.git(Some(checkout), ["reset", "--quiet", "--hard", "FETCH_HEAD"])
            .await
            .map_err(GitFailure::into_fetch_error)?;
        self.head(checkout).await
    }

    async fn head(&self, checkout: &Path) -> Result<Observation, FetchError> {
        self.git(Some(checkout), ["rev-parse", "HEAD"])
            .await
            .map(Observation::Revision)
            .map_err(GitFailure::into_fetch_error)
    }
}

/// Remove whatever a failed clone left behind
async fn discard_checkout(checkout: &Path) {
    match tokio::fs::remove_dir_all(checkout).await {
        Ok(()) => debug!(path = %checkout.display(), "removed partial checkout"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            path = %checkout.display(),
            error = %e,
            "failed to remove partial checkout, next clone may fail"
        ),
    }
}

#[derive(Debug)]
enum GitFailure {
    /// git could not be started at all
    Spawn(String),
    /// git ran and exited non-zero; holds stderr
    Exit(String),
}

impl GitFailure {
    fn into_fetch_error(self) -> FetchError {
        match self {
            GitFailure::Spawn(message) => FetchError::Setup(message),
            GitFailure::Exit(stderr) => classify_git_failure(&stderr),
        }
    }
}

#[async_trait]
impl RevisionSource for GitSource {
    async fn observe(&self, target: &Target) -> Result<Observation, FetchError> {
        let checkout = self.checkout_path(target);
        if checkout.join(".git").exists() {
            self.update_target(target, &checkout).await
        } else {
            self.clone_target(target, &checkout).await
        }
    }

    fn checkout_path(&self, target: &Target) -> PathBuf {
        self.base_dir.join(&target.name)
    }
}
