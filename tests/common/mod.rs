//! Shared fakes for the daemon integration tests

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use pico::executor::{DeployAction, DeployError, DeployRequest};
use pico::secret::{LeaseRenewal, SecretError};
use pico::watcher::{FetchError, Observation, RevisionSource};
use pico::{Config, Target};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Remote whose branch heads the test moves by hand
#[derive(Debug, Default)]
pub struct FakeRemote {
    heads: Mutex<HashMap<String, Result<Observation, FetchError>>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_head(&self, target: &str, revision: &str) {
        self.heads.lock().unwrap().insert(
            target.to_string(),
            Ok(Observation::Revision(revision.to_string())),
        );
    }

    pub fn delete_branch(&self, target: &str) {
        self.heads
            .lock()
            .unwrap()
            .insert(target.to_string(), Ok(Observation::Gone));
    }

    pub fn fail_with(&self, target: &str, error: FetchError) {
        self.heads
            .lock()
            .unwrap()
            .insert(target.to_string(), Err(error));
    }
}

#[async_trait]
impl RevisionSource for FakeRemote {
    async fn observe(&self, target: &Target) -> Result<Observation, FetchError> {
        self.heads
            .lock()
            .unwrap()
            .get(&target.name)
            .cloned()
            .unwrap_or(Ok(Observation::Gone))
    }

    fn checkout_path(&self, target: &Target) -> PathBuf {
        PathBuf::from("/srv/pico").join(&target.name)
    }
}

/// Deployment action that reports every request over a channel
#[derive(Debug)]
pub struct RecordingAction {
    requests: mpsc::UnboundedSender<DeployRequest>,
    failing: HashSet<String>,
}

impl RecordingAction {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeployRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                requests: tx,
                failing: HashSet::new(),
            },
            rx,
        )
    }

    /// Make deployments of `target` fail after they are recorded
    pub fn failing_for(mut self, target: &str) -> Self {
        self.failing.insert(target.to_string());
        self
    }
}

#[async_trait]
impl DeployAction for RecordingAction {
    async fn deploy(&self, request: &DeployRequest) -> Result<(), DeployError> {
        let _ = self.requests.send(request.clone());
        if self.failing.contains(&request.target.name) {
            return Err(DeployError::Failed {
                program: "docker".to_string(),
                code: Some(1),
                stderr: "compose failed".to_string(),
            });
        }
        Ok(())
    }
}

/// Lease that can be told to start rejecting renewals
#[derive(Debug, Default)]
pub struct CountingRenewal {
    calls: AtomicU32,
    reject: std::sync::atomic::AtomicBool,
}

impl CountingRenewal {
    pub fn rejecting() -> Self {
        let renewal = Self::default();
        renewal.reject.store(true, Ordering::SeqCst);
        renewal
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeaseRenewal for CountingRenewal {
    async fn renew(&self) -> Result<(), SecretError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Err(SecretError::LeaseExpired("token expired".to_string()));
        }
        Ok(())
    }
}

pub fn config(check_interval: Duration) -> Config {
    Config {
        check_interval,
        no_ssh: true,
        ..Config::default()
    }
}

pub fn target(name: &str) -> Target {
    Target::new(name, format!("https://git.example.com/{name}.git"))
}

/// Wait for the next recorded request, failing the test after `limit`
pub async fn next_request(
    requests: &mut mpsc::UnboundedReceiver<DeployRequest>,
    limit: Duration,
) -> DeployRequest {
    tokio::time::timeout(limit, requests.recv())
        .await
        .expect("timed out waiting for a deployment")
        .expect("recording action dropped")
}
