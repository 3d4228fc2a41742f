//! # Watcher
//!
//! Polls every registered target for its latest revision and emits an
//! [`ExecutionTask`] onto the bus whenever a revision changes.
//!
//! Per target the watcher is a small state machine:
//!
//! ```text
//! Uninitialized --(revision r)--> Synced(r)          emits InitialSync
//! Synced(a)     --(revision a)--> Synced(a)          nothing
//! Synced(a)     --(revision b)--> Synced(b)          emits Update
//! Synced(a)     --(gone)-------> Uninitialized       emits Removal
//! ```
//!
//! Poll cycles are strictly sequential and so are the fetches inside a cycle.

mod git;

pub use git::{classify_git_failure, GitAuth, GitSource};

use crate::bus::{BusError, BusSender};
use crate::constants;
use crate::runtime::backoff::{retry, RetryError, RetryPolicy};
use crate::runtime::RuntimeError;
use crate::task::{EventKind, ExecutionTask, Target};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Fetch failure for one target
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Cannot be fixed by retrying (authentication, missing agent)
    #[error("watcher setup failed: {0}")]
    Setup(String),
    /// One fetch failed; the next poll may succeed
    #[error("fetch failed: {0}")]
    Transient(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Result of asking the remote for a target's revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Current revision of the tracked branch
    Revision(String),
    /// Tracked branch does not exist on the remote
    Gone,
}

/// Source of truth for target revisions
#[async_trait]
pub trait RevisionSource: Send + Sync + std::fmt::Debug {
    /// Bring the local checkout up to date and report the remote revision
    async fn observe(&self, target: &Target) -> Result<Observation, FetchError>;

    /// Directory the target's deployment action runs in
    fn checkout_path(&self, target: &Target) -> PathBuf;
}

/// Last known state of one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetState {
    Uninitialized,
    Synced(String),
}

/// Apply one observation to a target state
///
/// Returns the next state and, when the revision changed, the event to emit
/// together with the revision it refers to.
pub fn transition(
    state: &TargetState,
    observation: Observation,
) -> (TargetState, Option<(EventKind, String)>) {
    match (state, observation) {
        (TargetState::Uninitialized, Observation::Revision(rev)) => (
            TargetState::Synced(rev.clone()),
            Some((EventKind::InitialSync, rev)),
        ),
        (TargetState::Uninitialized, Observation::Gone) => (TargetState::Uninitialized, None),
        (TargetState::Synced(current), Observation::Revision(rev)) if *current == rev => {
            (state.clone(), None)
        }
        (TargetState::Synced(_), Observation::Revision(rev)) => (
            TargetState::Synced(rev.clone()),
            Some((EventKind::Update, rev)),
        ),
        (TargetState::Synced(last), Observation::Gone) => (
            TargetState::Uninitialized,
            Some((EventKind::Removal, last.clone())),
        ),
    }
}

/// Why a poll cycle stopped early
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watcher cancelled")]
    Cancelled,
    #[error(transparent)]
    Fatal(FetchError),
    #[error("task bus closed")]
    BusClosed,
}

#[derive(Debug)]
struct WatchedTarget {
    target: Target,
    state: TargetState,
}

/// Change detector feeding the task bus
#[derive(Debug)]
pub struct Watcher {
    source: Arc<dyn RevisionSource>,
    interval: Duration,
    fetch_policy: RetryPolicy,
    targets: Vec<WatchedTarget>,
}

impl Watcher {
    pub fn new(source: Arc<dyn RevisionSource>, interval: Duration) -> Self {
        Self {
            source,
            interval,
            fetch_policy: RetryPolicy::exponential(
                constants::FETCH_MAX_ATTEMPTS,
                constants::FETCH_BACKOFF_BASE,
                constants::FETCH_BACKOFF_MAX,
            ),
            targets: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_fetch_policy(mut self, policy: RetryPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    /// Register targets to watch; call once before [`Watcher::start`]
    pub fn register(&mut self, targets: impl IntoIterator<Item = Target>) {
        for target in targets {
            info!(stack = %target.name, url = %target.url, branch = %target.branch, "registered target");
            self.targets.push(WatchedTarget {
                target,
                state: TargetState::Uninitialized,
            });
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().map(|w| &w.target)
    }

    pub fn state(&self, name: &str) -> Option<&TargetState> {
        self.targets
            .iter()
            .find(|w| w.target.name == name)
            .map(|w| &w.state)
    }

    /// Run one poll cycle over every target, returning the number of tasks emitted
    pub async fn poll_once(
        &mut self,
        bus: &BusSender,
        cancel: &CancellationToken,
    ) -> Result<usize, WatchError> {
        let mut emitted = 0;
        for watched in &mut self.targets {
            let source = &self.source;
            let target = &watched.target;

            let observed = retry(
                self.fetch_policy,
                cancel,
                FetchError::is_transient,
                |attempt| async move {
                    let outcome = source.observe(target).await;
                    if let Err(e) = &outcome {
                        debug!(stack = %target.name, attempt = attempt + 1, error = %e, "fetch attempt failed");
                    }
                    outcome
                },
            )
            .await;

            let observation = match observed {
                Ok(observation) => observation,
                Err(RetryError::Cancelled) => return Err(WatchError::Cancelled),
                Err(RetryError::Failed { last, .. }) if !last.is_transient() => {
                    error!(stack = %target.name, error = %last, "unrecoverable fetch failure");
                    return Err(WatchError::Fatal(last));
                }
                Err(RetryError::Failed { attempts, last }) => {
                    warn!(stack = %target.name, attempts, error = %last, "fetch failed, will retry next cycle");
                    continue;
                }
            };

            let (next, event) = transition(&watched.state, observation);
            watched.state = next;

            if let Some((kind, revision)) = event {
                info!(stack = %target.name, revision = %revision, kind = %kind, "target changed");
                let task = ExecutionTask {
                    target: target.name.clone(),
                    path: self.source.checkout_path(target),
                    revision,
                    kind,
                };
                if bus.is_full() {
                    warn!(stack = %target.name, "task bus full, waiting for the executor");
                }
                match bus.push(task, cancel).await {
                    Ok(()) => {
                        emitted += 1;
                        debug!(stack = %target.name, queued = bus.len(), "task queued");
                    }
                    Err(BusError::Cancelled) => return Err(WatchError::Cancelled),
                    Err(BusError::Closed) => return Err(WatchError::BusClosed),
                }
            }
        }
        Ok(emitted)
    }

    /// Poll until cancelled or a fatal error occurs
    ///
    /// The first cycle runs immediately; each later cycle waits `interval`.
    pub async fn start(mut self, bus: BusSender, cancel: CancellationToken) -> Result<(), RuntimeError> {
        info!(
            targets = self.targets.len(),
            interval_secs = self.interval.as_secs(),
            "starting watcher"
        );
        let mut first = true;
        loop {
            if !first {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.interval) => {}
                }
            }
            first = false;

            match self.poll_once(&bus, &cancel).await {
                Ok(emitted) => debug!(emitted, "poll cycle complete"),
                Err(WatchError::Cancelled) => break,
                Err(WatchError::Fatal(e)) => return Err(RuntimeError::Watcher(e)),
                Err(WatchError::BusClosed) => return Err(RuntimeError::BusClosed),
            }
        }
        info!("watcher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::TaskBus;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Revision source driven by a per-target script of results
    #[derive(Debug, Default)]
    struct ScriptedSource {
        scripts: Mutex<HashMap<String, Vec<Result<Observation, FetchError>>>>,
    }

    impl ScriptedSource {
        fn script(&self, target: &str, results: Vec<Result<Observation, FetchError>>) {
            self.scripts
                .lock()
                .unwrap()
                .insert(target.to_string(), results);
        }
    }

    #[async_trait]
    impl RevisionSource for ScriptedSource {
        async fn observe(&self, target: &Target) -> Result<Observation, FetchError> {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(target.name.clone()).or_default();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script
                    .first()
                    .cloned()
                    .unwrap_or_else(|| Err(FetchError::Transient("no script".to_string())))
            }
        }

        fn checkout_path(&self, target: &Target) -> PathBuf {
            PathBuf::from("/srv/pico").join(&target.name)
        }
    }

    fn rev(r: &str) -> Result<Observation, FetchError> {
        Ok(Observation::Revision(r.to_string()))
    }

    fn watcher(source: &Arc<ScriptedSource>, names: &[&str]) -> Watcher {
        let mut watcher = Watcher::new(
            Arc::clone(source) as Arc<dyn RevisionSource>,
            Duration::from_secs(10),
        )
        .with_fetch_policy(RetryPolicy::constant(2, Duration::from_millis(1)));
        watcher.register(
            names
                .iter()
                .map(|n| Target::new(*n, format!("https://example.com/{n}.git"))),
        );
        watcher
    }

    #[test]
    fn test_transitions() {
        let synced = TargetState::Synced("a1".to_string());

        assert_eq!(
            transition(&TargetState::Uninitialized, Observation::Revision("a1".into())),
            (synced.clone(), Some((EventKind::InitialSync, "a1".to_string())))
        );
        assert_eq!(
            transition(&synced, Observation::Revision("a1".into())),
            (synced.clone(), None)
        );
        assert_eq!(
            transition(&synced, Observation::Revision("b2".into())),
            (
                TargetState::Synced("b2".to_string()),
                Some((EventKind::Update, "b2".to_string()))
            )
        );
        assert_eq!(
            transition(&synced, Observation::Gone),
            (
                TargetState::Uninitialized,
                Some((EventKind::Removal, "a1".to_string()))
            )
        );
        assert_eq!(
            transition(&TargetState::Uninitialized, Observation::Gone),
            (TargetState::Uninitialized, None)
        );
    }

    #[tokio::test]
    async fn test_poll_emits_initial_then_update() {
        let source = Arc::new(ScriptedSource::default());
        source.script("app1", vec![rev("a1"), rev("a1"), rev("b2")]);
        let mut watcher = watcher(&source, &["app1"]);
        let (tx, mut rx) = TaskBus::new(10).split();
        let cancel = CancellationToken::new();

        assert_eq!(watcher.poll_once(&tx, &cancel).await.unwrap(), 1);
        assert_eq!(watcher.poll_once(&tx, &cancel).await.unwrap(), 0);
        assert_eq!(watcher.poll_once(&tx, &cancel).await.unwrap(), 1);

        let first = rx.pop(&cancel).await.unwrap();
        assert_eq!(first.kind, EventKind::InitialSync);
        assert_eq!(first.revision, "a1");
        assert_eq!(first.path, PathBuf::from("/srv/pico/app1"));

        let second = rx.pop(&cancel).await.unwrap();
        assert_eq!(second.kind, EventKind::Update);
        assert_eq!(second.revision, "b2");
        assert_eq!(
            watcher.state("app1"),
            Some(&TargetState::Synced("b2".to_string()))
        );
    }

    #[tokio::test]
    async fn test_transient_failure_skips_only_that_target() {
        let source = Arc::new(ScriptedSource::default());
        source.script(
            "broken",
            vec![Err(FetchError::Transient("timeout".to_string()))],
        );
        source.script("app2", vec![rev("c3")]);
        let mut watcher = watcher(&source, &["broken", "app2"]);
        let (tx, mut rx) = TaskBus::new(10).split();
        let cancel = CancellationToken::new();

        assert_eq!(watcher.poll_once(&tx, &cancel).await.unwrap(), 1);
        assert_eq!(rx.pop(&cancel).await.unwrap().target, "app2");
        assert_eq!(watcher.state("broken"), Some(&TargetState::Uninitialized));
    }

    #[tokio::test]
    async fn test_transient_failure_retried_within_cycle() {
        let source = Arc::new(ScriptedSource::default());
        source.script(
            "app1",
            vec![Err(FetchError::Transient("reset".to_string())), rev("a1")],
        );
        let mut watcher = watcher(&source, &["app1"]);
        let (tx, _rx) = TaskBus::new(10).split();

        let emitted = watcher
            .poll_once(&tx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(emitted, 1);
    }

    #[tokio::test]
    async fn test_setup_failure_is_fatal() {
        let source = Arc::new(ScriptedSource::default());
        source.script(
            "app1",
            vec![Err(FetchError::Setup("Permission denied (publickey)".to_string()))],
        );
        let watcher = watcher(&source, &["app1"]);
        let (tx, _rx) = TaskBus::new(10).split();

        let err = watcher
            .start(tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Watcher(FetchError::Setup(_))));
    }

    #[tokio::test]
    async fn test_removal_emitted_when_branch_disappears() {
        let source = Arc::new(ScriptedSource::default());
        source.script("app1", vec![rev("a1"), Ok(Observation::Gone)]);
        let mut watcher = watcher(&source, &["app1"]);
        let (tx, mut rx) = TaskBus::new(10).split();
        let cancel = CancellationToken::new();

        watcher.poll_once(&tx, &cancel).await.unwrap();
        watcher.poll_once(&tx, &cancel).await.unwrap();

        rx.pop(&cancel).await.unwrap();
        let removal = rx.pop(&cancel).await.unwrap();
        assert_eq!(removal.kind, EventKind::Removal);
        assert_eq!(removal.revision, "a1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_polls_on_interval_until_cancelled() {
        let source = Arc::new(ScriptedSource::default());
        source.script("app1", vec![rev("a1"), rev("b2"), rev("c3")]);
        let watcher = watcher(&source, &["app1"]);
        let (tx, mut rx) = TaskBus::new(10).split();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(watcher.start(tx, cancel.clone()));

        // immediate cycle plus the cycles at 10s and 20s
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let rx_cancel = CancellationToken::new();
        let revisions: Vec<String> = [
            rx.pop(&rx_cancel).await.unwrap(),
            rx.pop(&rx_cancel).await.unwrap(),
            rx.pop(&rx_cancel).await.unwrap(),
        ]
        .into_iter()
        .map(|t| t.revision)
        .collect();
        assert_eq!(revisions, vec!["a1", "b2", "c3"]);
    }

    #[tokio::test]
    async fn test_poll_waits_for_room_on_full_bus() {
        let source = Arc::new(ScriptedSource::default());
        source.script("app1", vec![rev("a1")]);
        source.script("app2", vec![rev("b1")]);
        let mut watcher = watcher(&source, &["app1", "app2"]);
        let (tx, mut rx) = TaskBus::new(1).split();
        let cancel = CancellationToken::new();

        let poll = tokio::spawn(async move { watcher.poll_once(&tx, &cancel).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!poll.is_finished(), "second push should wait for room");

        let rx_cancel = CancellationToken::new();
        assert_eq!(rx.pop(&rx_cancel).await.unwrap().target, "app1");
        assert_eq!(poll.await.unwrap().unwrap(), 2);
        assert_eq!(rx.pop(&rx_cancel).await.unwrap().target, "app2");
    }

    #[tokio::test]
    async fn test_closed_bus_is_fatal() {
        let source = Arc::new(ScriptedSource::default());
        source.script("app1", vec![rev("a1")]);
        let watcher = watcher(&source, &["app1"]);
        let (tx, rx) = TaskBus::new(10).split();
        drop(rx);

        let err = watcher
            .start(tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::BusClosed));
    }
}
