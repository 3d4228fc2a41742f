//! # Pico Daemon
//!
//! Parses configuration, performs setup and runs the supervisor until a
//! shutdown signal arrives or a fatal error occurs.

use anyhow::{Context, Result};
use clap::Parser;
use pico::config::{Args, Config};
use pico::observability;
use pico::App;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_args(args).context("Invalid configuration")?;
    observability::init_tracing(config.log_format)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        targets = %config.targets_file.display(),
        hostname = %config.hostname,
        "starting pico"
    );

    let app = App::initialise(config)
        .await
        .context("Failed to initialise pico")?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    app.start(cancel).await.context("pico terminated")?;
    Ok(())
}

/// Cancel the root token on Ctrl-C or SIGTERM
async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "failed to listen for Ctrl-C");
                return;
            }
        }
        () = terminate => {}
    }
    info!("shutdown signal received");
    cancel.cancel();
}
