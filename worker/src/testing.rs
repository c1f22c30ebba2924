//! In-memory collaborators
//!
//! Stand-ins for the database, the secret store, the log sink, the executor
//! and the queue, used by tests and local dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::deploy::events::ExecutorEvent;
use crate::deploy::executor::{ExecutionSpec, Executor};
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use crate::errors::WorkerError;
use crate::http::loki::LogSink;
use crate::http::vault::SecretStore;
use crate::models::blueprint::{Blueprint, BlueprintComponent};
use crate::models::deployment::{Deployment, DeploymentStatus, DeploymentType};
use crate::models::host::{Credential, Host};
use crate::repository::{BlueprintRepository, DeploymentRepository, HostRepository};
use crate::workers::consumer::{Delivery, MessageSource};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ================================ REPOSITORY ===================================== //

#[derive(Debug, Clone)]
struct CredentialRow {
    id: i64,
    name: String,
    credential_type: String,
}

#[derive(Default)]
struct Tables {
    blueprints: HashMap<i64, Blueprint>,
    components: HashMap<i64, Vec<BlueprintComponent>>,
    hosts: BTreeMap<i64, (Host, CredentialRow)>,
    deployments: HashMap<String, Deployment>,
    host_mappings: BTreeMap<(String, i64), DeploymentStatus>,
    transitions: Vec<(String, DeploymentStatus, DeploymentStatus)>,
    finalize_calls: usize,
}

/// Repository holding every table in memory.
///
/// Transitions go through the same guarded state machine as the database
/// statements, so duplicate starts and late terminal events behave alike.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_blueprint(&self, blueprint: Blueprint, components: Vec<BlueprintComponent>) {
        let mut tables = lock(&self.tables);
        tables.components.insert(blueprint.id, components);
        tables.blueprints.insert(blueprint.id, blueprint);
    }

    /// Add a host together with the credential it references
    pub fn add_host(&self, host: Host, credential_name: &str) {
        let credential = CredentialRow {
            id: host.credential_id,
            name: credential_name.to_string(),
            credential_type: "ssh".to_string(),
        };
        lock(&self.tables).hosts.insert(host.id, (host, credential));
    }

    /// Add a pending deployment with one pending mapping per host
    pub fn add_deployment(
        &self,
        id: &str,
        user_id: &str,
        blueprint_id: i64,
        deployment_type: DeploymentType,
        host_ids: &[i64],
    ) {
        let now = Utc::now();
        let mut tables = lock(&self.tables);
        tables.deployments.insert(
            id.to_string(),
            Deployment {
                id: id.to_string(),
                user_id: user_id.to_string(),
                blueprint_id,
                deployment_type,
                status: DeploymentStatus::Pending,
                created_at: now,
                updated_at: now,
            },
        );
        for host_id in host_ids {
            tables
                .host_mappings
                .insert((id.to_string(), *host_id), DeploymentStatus::Pending);
        }
    }

    pub fn deployment_status(&self, id: &str) -> Option<DeploymentStatus> {
        lock(&self.tables).deployments.get(id).map(|d| d.status)
    }

    pub fn host_status(&self, deployment_id: &str, host_id: i64) -> Option<DeploymentStatus> {
        lock(&self.tables)
            .host_mappings
            .get(&(deployment_id.to_string(), host_id))
            .copied()
    }

    /// Every applied transition of a deployment, oldest first
    pub fn transitions(&self, deployment_id: &str) -> Vec<(DeploymentStatus, DeploymentStatus)> {
        lock(&self.tables)
            .transitions
            .iter()
            .filter(|(id, _, _)| id == deployment_id)
            .map(|(_, from, to)| (*from, *to))
            .collect()
    }

    pub fn finalize_calls(&self) -> usize {
        lock(&self.tables).finalize_calls
    }
}

impl Tables {
    fn transition(&mut self, id: &str, event: DeploymentEvent) -> bool {
        let Some(deployment) = self.deployments.get_mut(id) else {
            return false;
        };
        let from = deployment.status;
        let mut fsm = DeploymentFsm::from_state(from);
        if !fsm.try_process(event) {
            return false;
        }
        deployment.status = fsm.state();
        deployment.updated_at = Utc::now();
        self.transitions.push((id.to_string(), from, fsm.state()));
        true
    }

    fn update_hosts(&mut self, id: &str, host_ids: &[i64], status: DeploymentStatus) -> u64 {
        let mut changed = 0;
        for host_id in host_ids {
            if let Some(current) = self.host_mappings.get_mut(&(id.to_string(), *host_id)) {
                *current = status;
                changed += 1;
            }
        }
        changed
    }
}

#[async_trait]
impl BlueprintRepository for InMemoryRepository {
    async fn get_blueprint(&self, id: i64) -> Result<Option<Blueprint>, WorkerError> {
        Ok(lock(&self.tables).blueprints.get(&id).cloned())
    }

    async fn get_blueprint_components(
        &self,
        blueprint_id: i64,
    ) -> Result<Vec<BlueprintComponent>, WorkerError> {
        Ok(lock(&self.tables)
            .components
            .get(&blueprint_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl HostRepository for InMemoryRepository {
    async fn get_hosts_with_credentials(
        &self,
        host_ids: &[i64],
    ) -> Result<Vec<(Host, Credential)>, WorkerError> {
        let tables = lock(&self.tables);
        Ok(tables
            .hosts
            .values()
            .filter(|(host, _)| host_ids.contains(&host.id))
            .map(|(host, row)| {
                let credential = Credential {
                    id: row.id,
                    name: row.name.clone(),
                    credential_type: row.credential_type.clone(),
                    user_id: host.user_id.clone(),
                    expires_at: None,
                    value: None,
                };
                (host.clone(), credential)
            })
            .collect())
    }
}

#[async_trait]
impl DeploymentRepository for InMemoryRepository {
    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, WorkerError> {
        Ok(lock(&self.tables).deployments.get(id).cloned())
    }

    async fn transition_deployment(
        &self,
        id: &str,
        event: DeploymentEvent,
    ) -> Result<bool, WorkerError> {
        Ok(lock(&self.tables).transition(id, event))
    }

    async fn update_deployment_host_status(
        &self,
        deployment_id: &str,
        host_ids: &[i64],
        status: DeploymentStatus,
    ) -> Result<u64, WorkerError> {
        Ok(lock(&self.tables).update_hosts(deployment_id, host_ids, status))
    }

    async fn finalize_deployment(
        &self,
        id: &str,
        completed_hosts: &[i64],
        failed_hosts: &[i64],
        event: DeploymentEvent,
    ) -> Result<bool, WorkerError> {
        let mut tables = lock(&self.tables);
        tables.finalize_calls += 1;
        if !tables.transition(id, event) {
            return Ok(false);
        }
        tables.update_hosts(id, completed_hosts, DeploymentStatus::Completed);
        tables.update_hosts(id, failed_hosts, DeploymentStatus::Failed);
        Ok(true)
    }
}

// ================================ SECRET STORE =================================== //

/// Secret store answering from a fixed map
#[derive(Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, Map<String, Value>>,
    unavailable: bool,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` (a JSON object) under `name`
    pub fn with_secret(mut self, name: &str, value: Value) -> Self {
        if let Value::Object(map) = value {
            self.secrets.insert(name.to_string(), map);
        }
        self
    }

    /// Fail every lookup as if the store were down
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn lookup(&self, name: &str) -> Result<Option<Map<String, Value>>, WorkerError> {
        if self.unavailable {
            return Err(WorkerError::SecretStoreError("secret store unavailable".to_string()));
        }
        Ok(self.secrets.get(name).cloned())
    }
}

// ================================== LOG SINK ===================================== //

/// Log sink keeping every pushed record
#[derive(Default)]
pub struct RecordingLogSink {
    records: Mutex<Vec<(String, Value)>>,
    failing: bool,
}

impl RecordingLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record pushes but report each one as failed
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<(String, Value)> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl LogSink for RecordingLogSink {
    async fn push(&self, job_id: &str, record: &Value) -> Result<(), WorkerError> {
        lock(&self.records).push((job_id.to_string(), record.clone()));
        if self.failing {
            return Err(WorkerError::UnexpectedStatus {
                url: "memory://logs".to_string(),
                status: 500,
                body: String::new(),
            });
        }
        Ok(())
    }
}

// ================================== EXECUTOR ===================================== //

/// Executor replaying a fixed event script
#[derive(Default)]
pub struct ScriptedExecutor {
    events: Vec<ExecutorEvent>,
    hang: bool,
    runs: Mutex<Vec<ExecutionSpec>>,
}

impl ScriptedExecutor {
    pub fn new(events: Vec<ExecutorEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// Emit the script, then never finish
    pub fn hanging(events: Vec<ExecutorEvent>) -> Self {
        Self {
            events,
            hang: true,
            ..Self::default()
        }
    }

    /// Specs of every run started so far
    pub fn runs(&self) -> Vec<ExecutionSpec> {
        lock(&self.runs).clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn run(
        &self,
        spec: &ExecutionSpec,
        events: mpsc::Sender<ExecutorEvent>,
    ) -> Result<(), WorkerError> {
        lock(&self.runs).push(spec.clone());
        for event in &self.events {
            if events.send(event.clone()).await.is_err() {
                return Ok(());
            }
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

// =================================== QUEUE ======================================= //

/// Message source fed through a channel; tokens are delivery sequence numbers
pub struct ChannelSource {
    receiver: mpsc::Receiver<Vec<u8>>,
    next_token: u64,
    acked: Arc<Mutex<Vec<u64>>>,
    rejected: Arc<Mutex<Vec<u64>>>,
}

impl ChannelSource {
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<Vec<u8>>) {
        let (sender, receiver) = mpsc::channel(buffer);
        let source = Self {
            receiver,
            next_token: 0,
            acked: Arc::new(Mutex::new(Vec::new())),
            rejected: Arc::new(Mutex::new(Vec::new())),
        };
        (source, sender)
    }

    /// Shared view of the acknowledged tokens
    pub fn acked(&self) -> Arc<Mutex<Vec<u64>>> {
        Arc::clone(&self.acked)
    }

    /// Shared view of the rejected tokens
    pub fn rejected(&self) -> Arc<Mutex<Vec<u64>>> {
        Arc::clone(&self.rejected)
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    type Token = u64;

    async fn next(&mut self) -> Result<Option<Delivery<u64>>, WorkerError> {
        match self.receiver.recv().await {
            Some(payload) => {
                self.next_token += 1;
                Ok(Some(Delivery {
                    payload,
                    token: self.next_token,
                }))
            }
            None => Err(WorkerError::QueueError("channel closed".to_string())),
        }
    }

    async fn ack(&mut self, token: u64) -> Result<(), WorkerError> {
        lock(&self.acked).push(token);
        Ok(())
    }

    async fn reject(&mut self, token: u64) -> Result<(), WorkerError> {
        lock(&self.rejected).push(token);
        Ok(())
    }
}
