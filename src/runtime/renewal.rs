//! # Lease Renewal Loop
//!
//! Extends the secret backend lease on a fixed cadence for the lifetime of
//! the process. A renewal that still fails after its retries is fatal: the
//! secrets handed to deployments could otherwise expire underneath them.

use super::backoff::{retry, RetryError, RetryPolicy};
use super::RuntimeError;
use crate::secret::LeaseRenewal;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Periodic lease renewal task
#[derive(Debug)]
pub struct RenewalLoop {
    renewal: Arc<dyn LeaseRenewal>,
    interval: Duration,
    policy: RetryPolicy,
}

impl RenewalLoop {
    pub fn new(renewal: Arc<dyn LeaseRenewal>, interval: Duration, policy: RetryPolicy) -> Self {
        Self {
            renewal,
            interval,
            policy,
        }
    }

    /// Renew every `interval` until cancelled
    ///
    /// Returns `Ok(())` on cancellation and `RuntimeError::RenewalExhausted`
    /// when a renewal fails on every attempt.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), RuntimeError> {
        info!(
            interval_secs = self.interval.as_secs(),
            "starting lease renewal loop"
        );
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("lease renewal loop cancelled");
                    return Ok(());
                }
                () = tokio::time::sleep(self.interval) => {}
            }

            let renewal = &self.renewal;
            let result = retry(self.policy, &cancel, |_| true, |attempt| async move {
                let outcome = renewal.renew().await;
                if let Err(e) = &outcome {
                    warn!(attempt = attempt + 1, error = %e, "lease renewal attempt failed");
                }
                outcome
            })
            .await;

            match result {
                Ok(()) => {}
                Err(RetryError::Cancelled) => {
                    info!("lease renewal loop cancelled");
                    return Ok(());
                }
                Err(RetryError::Failed { attempts, last }) => {
                    error!(attempts, error = %last, "lease renewal failed, giving up");
                    return Err(RuntimeError::RenewalExhausted {
                        attempts,
                        source: last,
                    });
                }
            }
        }
    }
}
