//! # Vault Secret Store
//!
//! Reads KV v2 secrets from HashiCorp Vault over its HTTP API and keeps the
//! token lease alive through [`LeaseRenewal`].
//!
//! Endpoints used:
//!
//! - `GET  /v1/auth/token/lookup-self` - validate the token, read its lease
//! - `GET  /v1/{mount}/data/{path}` - read a KV v2 secret
//! - `POST /v1/auth/token/renew-self` - extend the lease

use super::{LeaseRenewal, SecretError, SecretMap, SecretStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for the Vault backend
#[derive(Clone)]
pub struct VaultConfig {
    /// Base address, e.g. `https://vault.internal:8200`
    pub address: String,
    pub token: Zeroizing<String>,
    /// KV v2 mount holding per-target secrets
    pub mount: String,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("address", &self.address)
            .field("mount", &self.mount)
            .finish_non_exhaustive()
    }
}

/// Current token lease as last reported by Vault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseState {
    pub ttl: Duration,
    pub renewable: bool,
    pub refreshed_at: DateTime<Utc>,
}

impl LeaseState {
    /// Whether the lease has run out according to the last report
    ///
    /// A zero TTL is a non-expiring root token.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.ttl.is_zero() {
            return false;
        }
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => self.refreshed_at + ttl <= now,
            Err(_out_of_range) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    data: LookupData,
}

#[derive(Debug, Deserialize)]
struct LookupData {
    #[serde(default)]
    ttl: u64,
    #[serde(default)]
    renewable: bool,
}

#[derive(Debug, Deserialize)]
struct RenewResponse {
    auth: RenewAuth,
}

#[derive(Debug, Deserialize)]
struct RenewAuth {
    #[serde(default)]
    lease_duration: u64,
    #[serde(default)]
    renewable: bool,
}

#[derive(Debug, Deserialize)]
struct KvReadResponse {
    data: KvData,
}

#[derive(Debug, Deserialize)]
struct KvData {
    #[serde(default)]
    data: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Vault-backed secret store holding a renewable token lease
pub struct VaultSecrets {
    config: VaultConfig,
    http: Client,
    lease: RwLock<Option<LeaseState>>,
}

impl std::fmt::Debug for VaultSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSecrets")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl VaultSecrets {
    /// Connect to Vault and validate the token
    ///
    /// Fails when Vault is unreachable or rejects the token, so a bad
    /// configuration stops the process before any task starts.
    pub async fn connect(config: VaultConfig) -> Result<Self, SecretError> {
        let store = Self::unauthenticated(config)?;
        store.authenticate().await?;
        Ok(store)
    }

    /// Build the client without contacting Vault; the first lookup authenticates
    pub fn unauthenticated(config: VaultConfig) -> Result<Self, SecretError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SecretError::Unreachable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            http,
            lease: RwLock::new(None),
        })
    }

    /// Last lease reported by Vault, if authenticated
    pub async fn lease(&self) -> Option<LeaseState> {
        self.lease.read().await.clone()
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.config.address.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn authenticate(&self) -> Result<(), SecretError> {
        let response = self
            .http
            .get(self.url("auth/token/lookup-self"))
            .header(VAULT_TOKEN_HEADER, self.config.token.as_str())
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::FORBIDDEN => {
                return Err(SecretError::LeaseExpired(
                    "Vault rejected the token during lookup".to_string(),
                ))
            }
            status => return Err(unexpected_status(status)),
        }

        let body: LookupResponse = response.json().await?;
        let state = LeaseState {
            ttl: Duration::from_secs(body.data.ttl),
            renewable: body.data.renewable,
            refreshed_at: Utc::now(),
        };
        info!(
            address = %self.config.address,
            ttl_secs = body.data.ttl,
            renewable = body.data.renewable,
            "authenticated to Vault"
        );
        *self.lease.write().await = Some(state);
        Ok(())
    }
}

#[async_trait]
impl SecretStore for VaultSecrets {
    async fn get(&self, path: &str) -> Result<SecretMap, SecretError> {
        let current = self.lease.read().await.clone();
        match current {
            None => self.authenticate().await?,
            Some(state) if state.is_expired(Utc::now()) => {
                warn!("Vault lease looks expired, lookup may be rejected");
            }
            Some(_) => {}
        }

        let kv_path = format!(
            "{}/data/{}",
            self.config.mount.trim_matches('/'),
            path.trim_matches('/')
        );
        debug!(path = %kv_path, "reading secrets from Vault");

        let response = self
            .http
            .get(self.url(&kv_path))
            .header(VAULT_TOKEN_HEADER, self.config.token.as_str())
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(SecretError::NotFound(path.to_string())),
            StatusCode::FORBIDDEN => return Err(SecretError::Denied(path.to_string())),
            status => return Err(unexpected_status(status)),
        }

        let body: KvReadResponse = response.json().await?;
        let values = body
            .data
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(s) => (key, s),
                other => (key, other.to_string()),
            })
            .collect();
        Ok(values)
    }
}

#[async_trait]
impl LeaseRenewal for VaultSecrets {
    async fn renew(&self) -> Result<(), SecretError> {
        let mut lease = self.lease.write().await;

        if let Some(state) = lease.as_ref() {
            if !state.renewable {
                warn!("Vault token is not renewable, skipping renewal");
                return Ok(());
            }
        }

        let response = self
            .http
            .post(self.url("auth/token/renew-self"))
            .header(VAULT_TOKEN_HEADER, self.config.token.as_str())
            .json(&serde_json::json!({}))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::FORBIDDEN => {
                return Err(SecretError::LeaseExpired(
                    "Vault refused to renew the token".to_string(),
                ))
            }
            status => return Err(unexpected_status(status)),
        }

        let body: RenewResponse = response.json().await?;
        info!(
            ttl_secs = body.auth.lease_duration,
            "renewed Vault token lease"
        );
        *lease = Some(LeaseState {
            ttl: Duration::from_secs(body.auth.lease_duration),
            renewable: body.auth.renewable,
            refreshed_at: Utc::now(),
        });
        Ok(())
    }
}

fn unexpected_status(status: StatusCode) -> SecretError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        SecretError::Unreachable(format!("Vault responded with {status}"))
    } else {
        SecretError::Malformed(format!("unexpected Vault response status {status}"))
    }
}
