//! # Supervisor
//!
//! Builds the daemon from its configuration and runs the watcher, the
//! executor and (for leased secret backends) the renewal loop as sibling
//! tasks under one cancellation scope.
//!
//! Supervision is fail-fast: the first task to return an error cancels the
//! scope, every sibling observes the cancellation and exits, and `start`
//! returns that first error once all tasks have finished.

use super::backoff::RetryPolicy;
use super::renewal::RenewalLoop;
use super::RuntimeError;
use crate::bus::TaskBus;
use crate::config::{Config, SecretsConfig};
use crate::constants;
use crate::executor::{CommandAction, DeployAction, Executor};
use crate::reconfigure;
use crate::secret::{MemorySecrets, SecretBackend, VaultConfig, VaultSecrets};
use crate::task::Target;
use crate::watcher::{GitAuth, GitSource, RevisionSource, Watcher};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

/// Fully initialised daemon, ready to start
#[derive(Debug)]
pub struct App {
    targets: Vec<Target>,
    source: Arc<dyn RevisionSource>,
    secrets: SecretBackend,
    action: Arc<dyn DeployAction>,
    check_interval: Duration,
    renewal_interval: Duration,
    renewal_policy: RetryPolicy,
    bus_capacity: usize,
}

impl App {
    /// Perform every setup step that can fail before tasks start
    ///
    /// - SSH agent detection (unless disabled)
    /// - secret backend construction; Vault validates its token here
    /// - one-time target registration from the manifest
    pub async fn initialise(config: Config) -> Result<Self, RuntimeError> {
        config.validate()?;

        let auth = if config.no_ssh {
            GitAuth::Disabled
        } else {
            GitAuth::ssh_agent().map_err(RuntimeError::Auth)?
        };

        let secrets = match &config.secrets {
            SecretsConfig::Memory => {
                debug!("using memory secret store");
                SecretBackend::fixed(Arc::new(MemorySecrets::from_env()))
            }
            SecretsConfig::Vault {
                address,
                token,
                mount,
                renewal,
            } => {
                debug!(
                    address = %address,
                    mount = %mount,
                    renewal_secs = renewal.as_secs(),
                    "connecting to vault"
                );
                let vault = VaultSecrets::connect(VaultConfig {
                    address: address.clone(),
                    token: token.clone(),
                    mount: mount.clone(),
                })
                .await
                .map_err(RuntimeError::SecretSetup)?;
                SecretBackend::vault(vault)
            }
        };

        let targets = reconfigure::load_targets(&config.targets_file, &config.hostname).await?;
        let source = Arc::new(GitSource::new(config.directory.clone(), auth));

        Ok(Self::from_parts(
            targets,
            source,
            secrets,
            Arc::new(CommandAction::new()),
            &config,
        ))
    }

    /// Assemble an app from already-built collaborators
    pub fn from_parts(
        targets: Vec<Target>,
        source: Arc<dyn RevisionSource>,
        secrets: SecretBackend,
        action: Arc<dyn DeployAction>,
        config: &Config,
    ) -> Self {
        let renewal_interval = match &config.secrets {
            SecretsConfig::Vault { renewal, .. } => *renewal,
            SecretsConfig::Memory => Duration::from_secs(constants::DEFAULT_VAULT_RENEWAL_SECS),
        };
        Self {
            targets,
            source,
            secrets,
            action,
            check_interval: config.check_interval,
            renewal_interval,
            renewal_policy: RetryPolicy::constant(
                constants::RENEWAL_MAX_ATTEMPTS,
                constants::RENEWAL_RETRY_DELAY,
            ),
            bus_capacity: config.bus_capacity,
        }
    }

    /// Override the renewal cadence of a leased backend
    #[must_use]
    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = interval;
        self
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn secrets(&self) -> &SecretBackend {
        &self.secrets
    }

    /// Run every task until `cancel` fires or one of them fails
    ///
    /// Returns `Ok(())` when shut down through `cancel`, otherwise the first
    /// fatal error.
    pub async fn start(self, cancel: CancellationToken) -> Result<(), RuntimeError> {
        let scope = cancel.child_token();
        let (sender, receiver) = TaskBus::new(self.bus_capacity).split();

        let mut watcher = Watcher::new(self.source, self.check_interval);
        watcher.register(self.targets.iter().cloned());
        let executor = Executor::new(self.targets, self.secrets.store(), self.action);

        info!("starting service daemon");
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        let handle = tasks.spawn(
            executor
                .subscribe(receiver, scope.clone())
                .instrument(info_span!("executor")),
        );
        names.insert(handle.id(), "executor");

        let handle = tasks.spawn(
            watcher
                .start(sender, scope.clone())
                .instrument(info_span!("watcher")),
        );
        names.insert(handle.id(), "watcher");

        if let Some(renewal) = self.secrets.renewal() {
            let renewal_loop = RenewalLoop::new(renewal, self.renewal_interval, self.renewal_policy);
            let handle = tasks.spawn(
                renewal_loop
                    .run(scope.clone())
                    .instrument(info_span!("renewal")),
            );
            names.insert(handle.id(), "renewal");
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next_with_id().await {
            let (task, result) = match joined {
                Ok((id, result)) => (names.get(&id).copied().unwrap_or("unknown"), result),
                Err(e) => {
                    let task = names.get(&e.id()).copied().unwrap_or("unknown");
                    let reason = if e.is_panic() {
                        "task panicked".to_string()
                    } else {
                        e.to_string()
                    };
                    (
                        task,
                        Err(RuntimeError::TaskAborted {
                            task: task.to_string(),
                            reason,
                        }),
                    )
                }
            };

            match result {
                Ok(()) => debug!(task, "task exited"),
                Err(e) if first_error.is_none() => {
                    error!(task, error = %e, "fatal error, shutting down all tasks");
                    scope.cancel();
                    first_error = Some(e);
                }
                Err(e) => debug!(task, error = %e, "task failed during shutdown"),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("service daemon stopped");
                Ok(())
            }
        }
    }
}
