//! # Target Registration
//!
//! Loads the targets manifest once at startup and keeps the targets meant for
//! this host. The result is handed to the watcher and executor before any
//! polling begins.
//!
//! ```yaml
//! targets:
//!   - name: app1
//!     url: git@github.com:org/app1.git
//!     branch: main
//!     hosts: [edge-1]
//!     env:
//!       MODE: prod
//! ```

use crate::task::Target;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read targets manifest {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse targets manifest: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("target name '{0}' is used more than once")]
    DuplicateName(String),
    #[error("target name '{0}' is not a valid directory name")]
    InvalidName(String),
    #[error("target '{0}' has no repository url")]
    MissingUrl(String),
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    targets: Vec<Target>,
}

/// Parse a manifest document and validate its targets
pub fn parse_targets(document: &str) -> Result<Vec<Target>, ManifestError> {
    let manifest: Manifest = serde_yaml::from_str(document)?;
    let mut seen = HashSet::new();
    for target in &manifest.targets {
        let name = target.name.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(ManifestError::InvalidName(target.name.clone()));
        }
        if target.url.trim().is_empty() {
            return Err(ManifestError::MissingUrl(target.name.clone()));
        }
        if !seen.insert(name) {
            return Err(ManifestError::DuplicateName(target.name.clone()));
        }
    }
    Ok(manifest.targets)
}

/// Keep only the targets that deploy on `hostname`
pub fn for_host(targets: Vec<Target>, hostname: &str) -> Vec<Target> {
    targets
        .into_iter()
        .filter(|t| {
            let keep = t.runs_on(hostname);
            if !keep {
                debug!(stack = %t.name, hostname, "target not assigned to this host");
            }
            keep
        })
        .collect()
}

/// Read the manifest at `path` and return the targets for `hostname`
pub async fn load_targets(path: &Path, hostname: &str) -> Result<Vec<Target>, ManifestError> {
    let document = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ManifestError::Read {
            path: path.display().to_string(),
            source,
        })?;
    let all = parse_targets(&document)?;
    let total = all.len();
    let selected = for_host(all, hostname);
    info!(
        manifest = %path.display(),
        total,
        selected = selected.len(),
        "loaded targets"
    );
    Ok(selected)
}
