//! # Configuration
//!
//! Immutable process-wide parameters fixed at startup.
//!
//! Values come from command-line flags with environment variable fallbacks
//! (see [`Args`]) and are validated once into a [`Config`]. Nothing mutates
//! the configuration after the daemon starts.

mod args;

pub use args::{parse_duration, Args, LogFormat};

use crate::constants;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("check interval must be greater than zero")]
    ZeroCheckInterval,
    #[error("vault renewal interval must be greater than zero")]
    ZeroRenewalInterval,
    #[error("bus capacity must be greater than zero")]
    ZeroBusCapacity,
    #[error("a vault token is required when a vault address is set")]
    MissingVaultToken,
    #[error("invalid duration '{0}': expected a number with an ms, s, m or h suffix")]
    InvalidDuration(String),
}

/// Secret backend selection
#[derive(Clone)]
pub enum SecretsConfig {
    /// Static values from `PICO_SECRET_*` variables
    Memory,
    /// Vault KV v2 with a renewable token
    Vault {
        address: String,
        token: Zeroizing<String>,
        mount: String,
        renewal: Duration,
    },
}

impl std::fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretsConfig::Memory => f.write_str("Memory"),
            SecretsConfig::Vault {
                address,
                mount,
                renewal,
                ..
            } => f
                .debug_struct("Vault")
                .field("address", address)
                .field("mount", mount)
                .field("renewal", renewal)
                .finish_non_exhaustive(),
        }
    }
}

/// Validated daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Targets manifest
    pub targets_file: PathBuf,
    /// Base directory for target checkouts
    pub directory: PathBuf,
    /// Host name used to filter targets
    pub hostname: String,
    pub check_interval: Duration,
    /// Disable SSH-agent authentication for git
    pub no_ssh: bool,
    pub secrets: SecretsConfig,
    pub bus_capacity: usize,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            targets_file: PathBuf::from("pico.yaml"),
            directory: PathBuf::from("./cache"),
            hostname: String::new(),
            check_interval: Duration::from_secs(constants::DEFAULT_CHECK_INTERVAL_SECS),
            no_ssh: false,
            secrets: SecretsConfig::Memory,
            bus_capacity: constants::DEFAULT_BUS_CAPACITY,
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Build and validate a configuration from parsed arguments
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let address = args.vault_addr.unwrap_or_default();
        let secrets = if address.trim().is_empty() {
            SecretsConfig::Memory
        } else {
            let token = args
                .vault_token
                .filter(|t| !t.is_empty())
                .ok_or(ConfigError::MissingVaultToken)?;
            SecretsConfig::Vault {
                address,
                token: Zeroizing::new(token),
                mount: args.vault_path,
                renewal: args.vault_renewal,
            }
        };

        let config = Self {
            targets_file: args.targets,
            directory: args.directory,
            hostname: args.hostname.unwrap_or_default(),
            check_interval: args.check_interval,
            no_ssh: args.no_ssh,
            secrets,
            bus_capacity: args.bus_capacity,
            log_format: args.log_format,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval.is_zero() {
            return Err(ConfigError::ZeroCheckInterval);
        }
        if self.bus_capacity == 0 {
            return Err(ConfigError::ZeroBusCapacity);
        }
        if let SecretsConfig::Vault { renewal, token, .. } = &self.secrets {
            if renewal.is_zero() {
                return Err(ConfigError::ZeroRenewalInterval);
            }
            if token.is_empty() {
                return Err(ConfigError::MissingVaultToken);
            }
        }
        Ok(())
    }
}
