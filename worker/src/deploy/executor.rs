//! Automation executor
//!
//! The executor runs a generated plan against its inventory and reports one
//! [`ExecutorEvent`] per step, in emission order, over a channel.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::deploy::events::ExecutorEvent;
use crate::errors::WorkerError;
use crate::models::deployment::{DeploymentType, PlaybookInfo};

/// Inputs of a single executor run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSpec {
    pub work_dir: PathBuf,
    pub playbook: String,
    pub extra_args: Vec<String>,
}

impl ExecutionSpec {
    /// Plans run in check mode with a diff
    pub fn for_playbook(playbook: &PlaybookInfo, deployment_type: DeploymentType) -> Self {
        let extra_args = match deployment_type {
            DeploymentType::Plan => vec!["--check".to_string(), "--diff".to_string()],
            DeploymentType::Deploy => Vec::new(),
        };
        Self {
            work_dir: playbook.playbook_dir.clone(),
            playbook: playbook.playbook_name.clone(),
            extra_args,
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Run to completion, forwarding every event to `events`.
    ///
    /// Dropping the returned future stops the run.
    async fn run(
        &self,
        spec: &ExecutionSpec,
        events: mpsc::Sender<ExecutorEvent>,
    ) -> Result<(), WorkerError>;
}

/// Executor spawning `ansible-runner` and reading its JSON event output
#[derive(Debug, Clone)]
pub struct AnsibleRunnerExecutor {
    program: String,
}

impl AnsibleRunnerExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, spec: &ExecutionSpec) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("run")
            .arg(&spec.work_dir)
            .args(["-p", spec.playbook.as_str(), "-j"]);
        if !spec.extra_args.is_empty() {
            command.arg("--cmdline").arg(spec.extra_args.join(" "));
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Executor for AnsibleRunnerExecutor {
    async fn run(
        &self,
        spec: &ExecutionSpec,
        events: mpsc::Sender<ExecutorEvent>,
    ) -> Result<(), WorkerError> {
        info!(
            "Running {} in {} ({})",
            spec.playbook,
            spec.work_dir.display(),
            if spec.extra_args.is_empty() { "apply".to_string() } else { spec.extra_args.join(" ") }
        );

        let mut child = self
            .command(spec)
            .spawn()
            .map_err(|e| WorkerError::ExecutorError(format!("failed to start {}: {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::ExecutorError("executor stdout is not captured".to_string()))?;

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            match ExecutorEvent::from_line(&line) {
                Some(event) => {
                    if events.send(event).await.is_err() {
                        warn!("Event consumer went away, stopping executor");
                        break;
                    }
                }
                None => debug!("executor: {}", line),
            }
        }

        let status = child.wait().await?;
        if status.success() {
            info!("Executor finished for {}", spec.work_dir.display());
        } else {
            // Failed hosts also make the runner exit non-zero; the events carry the outcome.
            warn!("Executor exited with {} for {}", status, spec.work_dir.display());
        }
        Ok(())
    }
}
