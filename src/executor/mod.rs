//! # Executor
//!
//! Sole consumer of the task bus. For every task it resolves the target's
//! secrets, merges them into the deployment environment and runs the
//! deployment action, strictly one task at a time in bus order.
//!
//! Per-task failures (unknown target, secret lookup, failed action) are
//! logged and counted; the loop always moves on to the next task.

mod command;

pub use command::CommandAction;

use crate::bus::{BusError, BusReceiver};
use crate::runtime::RuntimeError;
use crate::secret::{SecretError, SecretStore};
use crate::task::{EventKind, ExecutionTask, Target};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Everything a deployment action needs for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub target: Target,
    /// Checkout directory to run in
    pub path: PathBuf,
    pub revision: String,
    pub kind: EventKind,
    /// Static target env overlaid with resolved secrets
    pub env: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("target '{0}' has an empty command")]
    EmptyCommand(String),
    #[error("failed to start '{program}': {message}")]
    Spawn { program: String, message: String },
    #[error("'{program}' exited with status {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Materialises a target at a revision
#[async_trait]
pub trait DeployAction: Send + Sync + std::fmt::Debug {
    async fn deploy(&self, request: &DeployRequest) -> Result<(), DeployError>;
}

/// Outcome of one consumed task
#[derive(Debug)]
pub enum ExecutionOutcome {
    Deployed,
    UnknownTarget,
    SecretsUnavailable(SecretError),
    DeployFailed(DeployError),
}

/// Running totals of task outcomes
#[derive(Debug, Default)]
pub struct ExecutionStats {
    succeeded: AtomicU64,
    failed: AtomicU64,
    secret_failures: AtomicU64,
}

impl ExecutionStats {
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    /// Deployment actions that ran and failed
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Tasks dropped because secrets could not be resolved
    pub fn secret_failures(&self) -> u64 {
        self.secret_failures.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: &ExecutionOutcome) {
        let counter = match outcome {
            ExecutionOutcome::Deployed => &self.succeeded,
            ExecutionOutcome::SecretsUnavailable(_) => &self.secret_failures,
            ExecutionOutcome::UnknownTarget | ExecutionOutcome::DeployFailed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Single consumer performing deployments
#[derive(Debug)]
pub struct Executor {
    targets: HashMap<String, Target>,
    secrets: Arc<dyn SecretStore>,
    action: Arc<dyn DeployAction>,
    stats: Arc<ExecutionStats>,
}

impl Executor {
    pub fn new(
        targets: impl IntoIterator<Item = Target>,
        secrets: Arc<dyn SecretStore>,
        action: Arc<dyn DeployAction>,
    ) -> Self {
        Self {
            targets: targets.into_iter().map(|t| (t.name.clone(), t)).collect(),
            secrets,
            action,
            stats: Arc::new(ExecutionStats::default()),
        }
    }

    /// Shared handle to the outcome counters
    pub fn stats(&self) -> Arc<ExecutionStats> {
        Arc::clone(&self.stats)
    }

    /// Process one task end to end
    pub async fn execute(&self, task: &ExecutionTask) -> ExecutionOutcome {
        let outcome = self.run(task).await;
        self.stats.record(&outcome);
        match &outcome {
            ExecutionOutcome::Deployed => info!(
                stack = %task.target,
                revision = %task.revision,
                kind = %task.kind,
                "deployment succeeded"
            ),
            ExecutionOutcome::UnknownTarget => {
                warn!(stack = %task.target, "task for unregistered target dropped");
            }
            ExecutionOutcome::SecretsUnavailable(e) => error!(
                stack = %task.target,
                error = %e,
                "failed to resolve secrets, task dropped"
            ),
            ExecutionOutcome::DeployFailed(e) => error!(
                stack = %task.target,
                revision = %task.revision,
                error = %e,
                "deployment failed"
            ),
        }
        outcome
    }

    async fn run(&self, task: &ExecutionTask) -> ExecutionOutcome {
        let Some(target) = self.targets.get(&task.target) else {
            return ExecutionOutcome::UnknownTarget;
        };

        let secrets = match self.secrets.get(target.secret_path()).await {
            Ok(secrets) => secrets,
            Err(e) => return ExecutionOutcome::SecretsUnavailable(e),
        };

        let mut env = target.env.clone();
        env.extend(secrets);

        let request = DeployRequest {
            target: target.clone(),
            path: task.path.clone(),
            revision: task.revision.clone(),
            kind: task.kind,
            env,
        };
        match self.action.deploy(&request).await {
            Ok(()) => ExecutionOutcome::Deployed,
            Err(e) => ExecutionOutcome::DeployFailed(e),
        }
    }

    /// Consume the bus until cancelled or every producer has gone away
    ///
    /// Cancellation also interrupts a deployment that is still running; the
    /// action's future is dropped mid-flight.
    pub async fn subscribe(
        self,
        mut bus: BusReceiver,
        cancel: CancellationToken,
    ) -> Result<(), RuntimeError> {
        info!(targets = self.targets.len(), "executor subscribed to task bus");
        loop {
            let task = match bus.pop(&cancel).await {
                Ok(task) => task,
                Err(BusError::Cancelled) => break,
                Err(BusError::Closed) => {
                    info!("task bus closed, executor draining complete");
                    break;
                }
            };
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!(
                        stack = %task.target,
                        revision = %task.revision,
                        kind = %task.kind,
                        "deployment abandoned on shutdown"
                    );
                    break;
                }
                _outcome = self.execute(&task) => {}
            }
        }
        info!(
            succeeded = self.stats.succeeded(),
            failed = self.stats.failed(),
            secret_failures = self.stats.secret_failures(),
            "executor stopped"
        );
        Ok(())
    }
}
