//! # Retry Backoff
//!
//! Bounded retry policies used by the renewal loop (constant delay) and the
//! watcher's fetches (exponential delay). Every wait is cancellation aware.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failed attempt
    Constant(Duration),
    /// `base * 2^n`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

/// Number of attempts plus the delay schedule between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn constant(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            backoff: Backoff::Constant(delay),
        }
    }

    pub fn exponential(attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            attempts,
            backoff: Backoff::Exponential { base, max },
        }
    }

    /// Delay to wait after failed attempt number `attempt` (0-indexed)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Constant(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                base.checked_mul(factor).map_or(max, |d| d.min(max))
            }
        }
    }
}

/// Why a retried operation gave up
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Cancellation fired before an attempt succeeded
    Cancelled,
    /// Every attempt failed, or an error was not worth retrying
    Failed { attempts: u32, last: E },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Cancelled => f.write_str("retry cancelled"),
            RetryError::Failed { attempts, last } => {
                write!(f, "failed after {attempts} attempt(s): {last}")
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Run `op` until it succeeds, the policy is exhausted, or `cancel` fires
///
/// Errors for which `retryable` returns false end the loop immediately.
pub async fn retry<T, E, F, Fut, P>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    retryable: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = op(attempt) => outcome,
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        attempt += 1;
        if attempt >= attempts || !retryable(&err) {
            return Err(RetryError::Failed {
                attempts: attempt,
                last: err,
            });
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            () = tokio::time::sleep(policy.delay_after(attempt - 1)) => {}
        }
    }
}
