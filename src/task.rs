//! # Tasks
//!
//! Deployment targets and the execution tasks the watcher emits for them.

use crate::constants;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// A single git-tracked stack that is deployed on this host
///
/// Targets are registered once at startup and never change during a run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Target {
    /// Unique name, also the checkout directory name
    pub name: String,
    /// Remote repository URL
    pub url: String,
    /// Tracked remote branch
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Command run in the checkout on initial sync and update
    #[serde(default = "default_up")]
    pub up: Vec<String>,
    /// Command run in the checkout when the tracked branch disappears
    #[serde(default = "default_down")]
    pub down: Vec<String>,
    /// Static environment passed to both commands
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Hosts this target deploys on; empty means every host
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Secret store path, defaults to the target name
    #[serde(default)]
    pub secret_path: Option<String>,
}

fn default_branch() -> String {
    constants::DEFAULT_BRANCH.to_string()
}

fn default_up() -> Vec<String> {
    ["docker", "compose", "up", "-d"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_down() -> Vec<String> {
    ["docker", "compose", "down"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

impl Target {
    /// Minimal target tracking the default branch with default commands
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            branch: default_branch(),
            up: default_up(),
            down: default_down(),
            env: HashMap::new(),
            hosts: Vec::new(),
            secret_path: None,
        }
    }

    /// Path used for secret lookups
    pub fn secret_path(&self) -> &str {
        self.secret_path.as_deref().unwrap_or(&self.name)
    }

    /// Whether this target should be deployed on `hostname`
    pub fn runs_on(&self, hostname: &str) -> bool {
        self.hosts.is_empty() || self.hosts.iter().any(|h| h == hostname)
    }
}

/// What happened to a target's tracked revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// First observation since startup (or since the target was removed)
    InitialSync,
    /// Revision moved
    Update,
    /// Tracked branch no longer exists on the remote
    Removal,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::InitialSync => "initial-sync",
            EventKind::Update => "update",
            EventKind::Removal => "removal",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of work queued on the bus: "target X changed to revision Y"
///
/// Consumed exactly once by the executor and then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTask {
    /// Target name
    pub target: String,
    /// Checkout directory the action runs in
    pub path: PathBuf,
    /// Observed revision; for removals, the last known revision
    pub revision: String,
    pub kind: EventKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_manifest_defaults() {
        let target: Target =
            serde_yaml::from_str("name: app1\nurl: git@example.com:org/app1.git\n").unwrap();

        assert_eq!(target.branch, "main");
        assert_eq!(target.up, vec!["docker", "compose", "up", "-d"]);
        assert_eq!(target.down, vec!["docker", "compose", "down"]);
        assert_eq!(target.secret_path(), "app1");
        assert!(target.env.is_empty());
    }

    #[test]
    fn test_target_host_filter() {
        let mut target = Target::new("app1", "https://example.com/app1.git");
        assert!(target.runs_on("any-host"));

        target.hosts = vec!["edge-1".to_string(), "edge-2".to_string()];
        assert!(target.runs_on("edge-2"));
        assert!(!target.runs_on("core-1"));
    }

    #[test]
    fn test_explicit_secret_path() {
        let mut target = Target::new("app1", "https://example.com/app1.git");
        target.secret_path = Some("shared/app".to_string());
        assert_eq!(target.secret_path(), "shared/app");
    }

    #[test]
    fn test_event_kind_labels() {
        assert_eq!(EventKind::InitialSync.to_string(), "initial-sync");
        assert_eq!(EventKind::Update.to_string(), "update");
        assert_eq!(EventKind::Removal.to_string(), "removal");
    }
}
