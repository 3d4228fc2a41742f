//! # Memory Secret Store
//!
//! Static secrets held in process memory. Used when no Vault address is
//! configured; there is no lease, so nothing is ever renewed.

use super::{SecretError, SecretMap, SecretStore};
use crate::constants::MEMORY_SECRET_ENV_PREFIX;
use async_trait::async_trait;

/// Fixed secrets shared by every path
#[derive(Debug, Clone, Default)]
pub struct MemorySecrets {
    shared: SecretMap,
}

impl MemorySecrets {
    pub fn new(shared: SecretMap) -> Self {
        Self { shared }
    }

    /// Seed shared secrets from `PICO_SECRET_<KEY>=<value>` pairs
    ///
    /// The prefix is stripped, so `PICO_SECRET_DB_PASS=x` becomes `DB_PASS=x`.
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let shared = vars
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(MEMORY_SECRET_ENV_PREFIX)
                    .filter(|k| !k.is_empty())
                    .map(|k| (k.to_string(), value))
            })
            .collect();
        Self::new(shared)
    }

    /// Seed shared secrets from the process environment
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }
}

#[async_trait]
impl SecretStore for MemorySecrets {
    async fn get(&self, _path: &str) -> Result<SecretMap, SecretError> {
        Ok(self.shared.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> SecretMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_from_vars_strips_prefix_and_ignores_others() {
        let store = MemorySecrets::from_vars(vec![
            ("PICO_SECRET_DB_PASS".to_string(), "x".to_string()),
            ("PICO_SECRET_".to_string(), "empty-key".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]);

        assert_eq!(store.get("app1").await.unwrap(), map(&[("DB_PASS", "x")]));
    }

    #[tokio::test]
    async fn test_every_path_sees_shared_values() {
        let store = MemorySecrets::new(map(&[("DB_PASS", "shared"), ("REGION", "eu")]));

        assert_eq!(store.get("app1").await.unwrap(), store.get("app2").await.unwrap());
        assert_eq!(
            store.get("nested/app3").await.unwrap(),
            map(&[("DB_PASS", "shared"), ("REGION", "eu")])
        );
    }
}
