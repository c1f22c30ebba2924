//! Persistence interfaces
//!
//! Blueprints, hosts and credentials are read-only here. Deployments and their
//! host mappings are only ever written through guarded transitions.

pub mod postgres;

use async_trait::async_trait;

use crate::deploy::fsm::DeploymentEvent;
use crate::errors::WorkerError;
use crate::models::blueprint::{Blueprint, BlueprintComponent};
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::models::host::{Credential, Host};

#[async_trait]
pub trait BlueprintRepository: Send + Sync {
    async fn get_blueprint(&self, id: i64) -> Result<Option<Blueprint>, WorkerError>;

    async fn get_blueprint_components(
        &self,
        blueprint_id: i64,
    ) -> Result<Vec<BlueprintComponent>, WorkerError>;
}

#[async_trait]
pub trait HostRepository: Send + Sync {
    /// Hosts joined with their credential; unknown ids are left out
    async fn get_hosts_with_credentials(
        &self,
        host_ids: &[i64],
    ) -> Result<Vec<(Host, Credential)>, WorkerError>;
}

#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, WorkerError>;

    /// Apply `event` only if the deployment is in the event's precondition state.
    ///
    /// Returns `false` when nothing changed.
    async fn transition_deployment(
        &self,
        id: &str,
        event: DeploymentEvent,
    ) -> Result<bool, WorkerError>;

    /// Set the status of the given host mappings; returns the number of rows changed
    async fn update_deployment_host_status(
        &self,
        deployment_id: &str,
        host_ids: &[i64],
        status: DeploymentStatus,
    ) -> Result<u64, WorkerError>;

    /// Persist per-host outcomes and the terminal deployment transition as one unit.
    ///
    /// Host rows are only written when the deployment transitions. Returns
    /// whether it did.
    async fn finalize_deployment(
        &self,
        id: &str,
        completed_hosts: &[i64],
        failed_hosts: &[i64],
        event: DeploymentEvent,
    ) -> Result<bool, WorkerError>;
}

/// Everything the worker reads and writes
pub trait Repository: BlueprintRepository + HostRepository + DeploymentRepository {}

impl<T> Repository for T where T: BlueprintRepository + HostRepository + DeploymentRepository {}
