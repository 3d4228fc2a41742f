//! # Command-Line Arguments
//!
//! Every flag can also be supplied through the environment variable named
//! next to it, which is how the daemon is usually configured in containers.

use super::ConfigError;
use crate::constants;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Pico - git-driven deployment daemon
#[derive(Debug, Parser)]
#[command(name = "pico", version, about, long_about = None)]
pub struct Args {
    /// Targets manifest listing the stacks to deploy
    #[arg(long, env = "PICO_TARGETS", default_value = "pico.yaml")]
    pub targets: PathBuf,

    /// Directory holding the target checkouts
    #[arg(long, env = "PICO_DIRECTORY", default_value = "./cache")]
    pub directory: PathBuf,

    /// Host name used to select targets from the manifest
    #[arg(long, env = "HOSTNAME")]
    pub hostname: Option<String>,

    /// Interval between checks for new revisions
    #[arg(long, env = "PICO_CHECK_INTERVAL", default_value = "10s", value_parser = parse_duration)]
    pub check_interval: Duration,

    /// Disable SSH-agent authentication for git remotes
    #[arg(long, env = "PICO_NO_SSH")]
    pub no_ssh: bool,

    /// Vault address; when unset secrets come from PICO_SECRET_* variables
    #[arg(long, env = "VAULT_ADDR")]
    pub vault_addr: Option<String>,

    /// Vault token
    #[arg(long, env = "VAULT_TOKEN", hide_env_values = true)]
    pub vault_token: Option<String>,

    /// KV v2 mount holding per-target secrets
    #[arg(long, env = "VAULT_PATH", default_value = constants::DEFAULT_VAULT_PATH)]
    pub vault_path: String,

    /// Interval between Vault token renewals
    #[arg(long, env = "VAULT_RENEWAL", default_value = "24h", value_parser = parse_duration)]
    pub vault_renewal: Duration,

    /// Maximum number of queued deployment tasks
    #[arg(long, env = "PICO_BUS_CAPACITY", default_value_t = constants::DEFAULT_BUS_CAPACITY)]
    pub bus_capacity: usize,

    /// Log output format
    #[arg(long, env = "PICO_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Parse `500ms`, `10s`, `5m` or `24h`; a bare number means seconds
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let invalid = || ConfigError::InvalidDuration(value.to_string());

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    if digits.is_empty() {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_overflow| invalid())?;

    let duration = match unit {
        "ms" => Duration::from_millis(amount),
        "" | "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.checked_mul(60).ok_or_else(invalid)?),
        "h" => Duration::from_secs(amount.checked_mul(3600).ok_or_else(invalid)?),
        _ => return Err(invalid()),
    };
    Ok(duration)
}
