//! # Logging
//!
//! Installs the process-wide tracing subscriber. Library code only emits
//! events through `tracing` macros inside task spans; only the binary calls
//! [`init_tracing`].

use crate::config::LogFormat;
use crate::constants::DEFAULT_LOG_FILTER;
use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG`, falling back to `pico=info`
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into())
}

/// Install the global subscriber in the requested format
#[allow(
    clippy::missing_errors_doc,
    reason = "Fails only when a subscriber is already installed"
)]
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
