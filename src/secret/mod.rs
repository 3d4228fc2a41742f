//! # Secret Stores
//!
//! Resolves a secret path to a set of environment variables for a deployment.
//!
//! Two backends exist:
//!
//! - [`MemorySecrets`] - fixed values, seeded from `PICO_SECRET_*` variables
//! - [`VaultSecrets`] - KV v2 lookups against Vault with a leased token that
//!   must be renewed for the lifetime of the process
//!
//! Renewal is a separate capability ([`LeaseRenewal`]) carried next to the
//! store in [`SecretBackend`], so the supervisor can tell whether a renewal
//! loop is needed without inspecting the concrete store type.

mod error;
mod memory;
mod vault;

pub use error::SecretError;
pub use memory::MemorySecrets;
pub use vault::{LeaseState, VaultConfig, VaultSecrets};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Key/value pairs resolved for one secret path
pub type SecretMap = HashMap<String, String>;

/// Read side of a secret backend
#[async_trait]
pub trait SecretStore: Send + Sync + std::fmt::Debug {
    /// Resolve every key stored under `path`
    async fn get(&self, path: &str) -> Result<SecretMap, SecretError>;
}

/// Backends holding a time-bounded lease implement this
#[async_trait]
pub trait LeaseRenewal: Send + Sync + std::fmt::Debug {
    /// Extend the lease once
    async fn renew(&self) -> Result<(), SecretError>;
}

/// A secret store plus its optional renewal capability
#[derive(Debug, Clone)]
pub struct SecretBackend {
    store: Arc<dyn SecretStore>,
    renewal: Option<Arc<dyn LeaseRenewal>>,
}

impl SecretBackend {
    /// Backend whose values never expire
    pub fn fixed(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            renewal: None,
        }
    }

    /// Backend whose lease must be renewed periodically
    pub fn leased(store: Arc<dyn SecretStore>, renewal: Arc<dyn LeaseRenewal>) -> Self {
        Self {
            store,
            renewal: Some(renewal),
        }
    }

    /// Vault-backed store; the same instance serves lookups and renewals
    pub fn vault(vault: VaultSecrets) -> Self {
        let vault = Arc::new(vault);
        Self::leased(
            Arc::clone(&vault) as Arc<dyn SecretStore>,
            vault as Arc<dyn LeaseRenewal>,
        )
    }

    pub fn store(&self) -> Arc<dyn SecretStore> {
        Arc::clone(&self.store)
    }

    pub fn renewal(&self) -> Option<Arc<dyn LeaseRenewal>> {
        self.renewal.as_ref().map(Arc::clone)
    }

    pub fn is_leased(&self) -> bool {
        self.renewal.is_some()
    }
}
