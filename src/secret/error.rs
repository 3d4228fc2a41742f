//! # Secret Store Error Types

use thiserror::Error;

/// Secret lookup or lease renewal failure
#[derive(Debug, Error)]
pub enum SecretError {
    /// Backend could not be reached (network, TLS, timeout)
    #[error("secret backend unreachable: {0}")]
    Unreachable(String),
    /// Lease has expired or the token was revoked
    #[error("secret lease expired or revoked: {0}")]
    LeaseExpired(String),
    /// Token is valid but may not read this path
    #[error("access denied to secret path '{0}'")]
    Denied(String),
    #[error("no secrets stored at path '{0}'")]
    NotFound(String),
    /// Backend answered with something other than a KV document
    #[error("malformed secret backend response: {0}")]
    Malformed(String),
}

impl SecretError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SecretError::Unreachable(_))
    }
}

impl From<reqwest::Error> for SecretError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SecretError::Malformed(e.to_string())
        } else {
            SecretError::Unreachable(e.to_string())
        }
    }
}
