//! # Command Deployment Action
//!
//! Runs the target's `up` command (or `down` on removal) inside its checkout
//! with the resolved environment layered over the daemon's own environment.
//! Dropping the deployment future (on shutdown) kills the command.

use super::{DeployAction, DeployError, DeployRequest};
use crate::task::EventKind;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

/// Deployment action that shells out to the target's configured commands
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandAction;

impl CommandAction {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeployAction for CommandAction {
    async fn deploy(&self, request: &DeployRequest) -> Result<(), DeployError> {
        let argv = match request.kind {
            EventKind::InitialSync | EventKind::Update => &request.target.up,
            EventKind::Removal => &request.target.down,
        };
        let Some((program, args)) = argv.split_first() else {
            return Err(DeployError::EmptyCommand(request.target.name.clone()));
        };

        info!(
            stack = %request.target.name,
            revision = %request.revision,
            kind = %request.kind,
            command = %argv.join(" "),
            "running deployment command"
        );

        let output = Command::new(program)
            .args(args)
            .current_dir(&request.path)
            .envs(&request.env)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DeployError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(DeployError::Failed {
                program: program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(
            stack = %request.target.name,
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            "deployment command output"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Target;
    use std::collections::HashMap;

    fn request(dir: &std::path::Path, up: &[&str], kind: EventKind) -> DeployRequest {
        let mut target = Target::new("app1", "https://example.com/app1.git");
        target.up = up.iter().map(ToString::to_string).collect();
        target.down = vec!["sh".to_string(), "-c".to_string(), "touch down-ran".to_string()];
        DeployRequest {
            target,
            path: dir.to_path_buf(),
            revision: "b2".to_string(),
            kind,
            env: HashMap::from([("DB_PASS".to_string(), "x".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_up_runs_in_checkout_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(
            dir.path(),
            &["sh", "-c", "printf %s \"$DB_PASS\" > injected"],
            EventKind::Update,
        );

        CommandAction::new().deploy(&req).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("injected")).unwrap();
        assert_eq!(written, "x");
    }

    #[tokio::test]
    async fn test_removal_runs_down_command() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path(), &["false"], EventKind::Removal);

        CommandAction::new().deploy(&req).await.unwrap();
        assert!(dir.path().join("down-ran").exists());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(
            dir.path(),
            &["sh", "-c", "echo broken >&2; exit 3"],
            EventKind::InitialSync,
        );

        let err = CommandAction::new().deploy(&req).await.unwrap_err();
        match err {
            DeployError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_deploy_kills_command() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(
            dir.path(),
            &["sh", "-c", "sleep 0.5; touch finished"],
            EventKind::Update,
        );

        let action = CommandAction::new();
        let interrupted =
            tokio::time::timeout(std::time::Duration::from_millis(100), action.deploy(&req)).await;
        assert!(interrupted.is_err());

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert!(!dir.path().join("finished").exists());
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path(), &[], EventKind::Update);

        assert!(matches!(
            CommandAction::new().deploy(&req).await,
            Err(DeployError::EmptyCommand(_))
        ));
    }
}
