//! Job intake
//!
//! Turns a raw queue message into generated artifacts and a dispatched run.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::deploy::tracker::{ExecutionTracker, RunRequest};
use crate::errors::WorkerError;
use crate::http::vault::SecretStore;
use crate::models::deployment::Job;
use crate::models::host::{Credential, CredentialSecret, Host};
use crate::plan::generator::PlanGenerator;
use crate::repository::Repository;

/// What to do with a delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The job was accepted and its run dispatched
    Ack,

    /// The message is dropped without being requeued
    Reject,
}

pub struct JobIntake {
    repository: Arc<dyn Repository>,
    secrets: Arc<dyn SecretStore>,
    generator: PlanGenerator,
    tracker: Arc<ExecutionTracker>,
}

impl JobIntake {
    pub fn new(
        repository: Arc<dyn Repository>,
        secrets: Arc<dyn SecretStore>,
        generator: PlanGenerator,
        tracker: Arc<ExecutionTracker>,
    ) -> Self {
        Self {
            repository,
            secrets,
            generator,
            tracker,
        }
    }

    /// Handle one delivered message
    pub async fn on_message(&self, payload: &[u8]) -> Disposition {
        let job = match Job::parse(payload) {
            Ok(job) => job,
            Err(e) => {
                warn!(
                    "Rejecting malformed message ({}): {}",
                    e,
                    String::from_utf8_lossy(payload)
                );
                return Disposition::Reject;
            }
        };

        info!(
            job_id = %job.job_id,
            blueprint_id = job.blueprint_id,
            "Received {} job for {} host(s)",
            job.deployment_type.as_str(),
            job.host_ids.len()
        );

        match self.process(&job).await {
            Ok(()) => Disposition::Ack,
            Err(e) if e.is_validation() => {
                warn!(job_id = %job.job_id, "Rejecting invalid job: {}", e);
                Disposition::Reject
            }
            Err(e) => {
                error!(
                    job_id = %job.job_id,
                    transient = e.is_transient(),
                    "Rejecting job: {}",
                    e
                );
                Disposition::Reject
            }
        }
    }

    /// Resolve a job's inputs, write its artifacts and dispatch its run
    pub async fn process(&self, job: &Job) -> Result<(), WorkerError> {
        if let Some(deployment) = self.repository.get_deployment(&job.job_id).await? {
            if deployment.status.is_terminal() {
                info!(
                    job_id = %job.job_id,
                    "Deployment already {}, skipping redelivered job",
                    deployment.status
                );
                return Ok(());
            }
        }

        let mut hosts = self.resolve_hosts(job).await?;

        for (_, credential) in hosts.iter_mut() {
            self.load_secret(job, credential).await?;
        }

        let blueprint = self
            .repository
            .get_blueprint(job.blueprint_id)
            .await?
            .ok_or_else(|| WorkerError::NotFound("blueprint not found".to_string()))?;
        let components = self.repository.get_blueprint_components(blueprint.id).await?;

        let playbook = self.generator.generate(job, &blueprint, &components).await?;
        self.generator.generate_inventory(job, &hosts).await?;

        Arc::clone(&self.tracker)
            .dispatch(RunRequest {
                playbook,
                deployment_type: job.deployment_type,
                host_ids: job.host_ids.clone(),
            })
            .await;
        Ok(())
    }

    async fn resolve_hosts(&self, job: &Job) -> Result<Vec<(Host, Credential)>, WorkerError> {
        let hosts = self
            .repository
            .get_hosts_with_credentials(&job.host_ids)
            .await?;

        let mut missing: Vec<i64> = job
            .host_ids
            .iter()
            .copied()
            .filter(|id| !hosts.iter().any(|(host, _)| host.id == *id))
            .collect();
        if !missing.is_empty() {
            missing.dedup();
            return Err(WorkerError::NotFound(format!("hosts not found: {:?}", missing)));
        }
        Ok(hosts)
    }

    async fn load_secret(&self, job: &Job, credential: &mut Credential) -> Result<(), WorkerError> {
        let name = credential.secret_name(&job.user_id);
        match self.secrets.lookup(&name).await? {
            Some(map) => {
                let secret = CredentialSecret::from_map(map).map_err(|e| {
                    WorkerError::InventoryError(format!(
                        "credential {} has a malformed value: {}",
                        credential.id, e
                    ))
                })?;
                credential.value = Some(secret);
            }
            None => warn!(job_id = %job.job_id, "No secret stored for credential {}", credential.id),
        }
        Ok(())
    }
}
