//! # Runtime Module
//!
//! Runtime components for the deployment daemon: retry backoff, the lease
//! renewal loop and the supervisor that starts and tears down every task.

pub mod backoff;
pub mod renewal;
pub mod supervisor;

pub use renewal::RenewalLoop;
pub use supervisor::App;

use crate::config::ConfigError;
use crate::reconfigure::ManifestError;
use crate::secret::SecretError;
use crate::watcher::FetchError;
use thiserror::Error;

/// Errors that stop the daemon
///
/// Setup failures come out of [`App::initialise`]; everything else is a
/// fatal runtime failure returned from [`App::start`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("git authentication setup failed: {0}")]
    Auth(#[source] FetchError),
    #[error("secret backend setup failed: {0}")]
    SecretSetup(#[source] SecretError),
    #[error("lease renewal failed after {attempts} attempt(s): {source}")]
    RenewalExhausted { attempts: u32, source: SecretError },
    #[error("watcher failed: {0}")]
    Watcher(#[source] FetchError),
    #[error("task bus closed while the daemon was running")]
    BusClosed,
    #[error("task '{task}' aborted: {reason}")]
    TaskAborted { task: String, reason: String },
}

impl RuntimeError {
    /// Whether the error happened before any task was started
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            RuntimeError::Config(_)
                | RuntimeError::Manifest(_)
                | RuntimeError::Auth(_)
                | RuntimeError::SecretSetup(_)
        )
    }
}
