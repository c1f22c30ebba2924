//! Artifact generator
//!
//! Turns a validated blueprint into the plan file and the host inventory of one
//! job's run directory.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::WorkerError;
use crate::models::blueprint::{Blueprint, BlueprintComponent};
use crate::models::deployment::{Job, PlaybookInfo};
use crate::models::host::{Credential, CredentialSecret, Host};
use crate::plan::roles::{PlanStep, RoleRegistry};
use crate::plan::validator;
use crate::storage::layout::{RunDir, RunsLayout, PLAYBOOK_NAME};

#[derive(Debug, Serialize)]
struct Play<'a> {
    name: String,
    hosts: &'static str,
    #[serde(rename = "become")]
    escalate: bool,
    roles: &'a [PlanStep],
}

/// Inventory group every host is placed in
pub const HOST_GROUP: &str = "group";

pub struct PlanGenerator {
    roles: Arc<RoleRegistry>,
    layout: RunsLayout,
}

impl PlanGenerator {
    pub fn new(roles: Arc<RoleRegistry>, layout: RunsLayout) -> Self {
        Self { roles, layout }
    }

    /// Run directory of a job
    pub fn run_dir(&self, job: &Job) -> Result<RunDir, WorkerError> {
        self.layout.run_dir(&job.user_id, &job.job_id)
    }

    /// Validate and compile every component, then write the plan file.
    ///
    /// Nothing is written to the plan file unless every component compiles.
    pub async fn generate(
        &self,
        job: &Job,
        blueprint: &Blueprint,
        components: &[BlueprintComponent],
    ) -> Result<PlaybookInfo, WorkerError> {
        blueprint.validate().map_err(WorkerError::ValidationError)?;

        if components.is_empty() {
            return Err(WorkerError::ValidationError(
                "no blueprint components found".to_string(),
            ));
        }

        for component in components {
            validator::validate(&component.component_parameters, &component.blueprint_parameters)?;
        }

        // Fail before any override file is downloaded.
        if let Some(unknown) = components.iter().find(|c| !self.roles.contains(&c.ansible_role)) {
            return Err(WorkerError::UnsupportedRole(unknown.ansible_role.clone()));
        }

        let run = self.run_dir(job)?;
        run.create().await?;

        let mut ordered: Vec<&BlueprintComponent> = components.iter().collect();
        ordered.sort_by_key(|c| c.position);

        let mut steps = Vec::with_capacity(ordered.len());
        for component in ordered {
            let compiled = self
                .roles
                .compile(&component.ansible_role, &component.blueprint_parameters, run.path())
                .await;

            match compiled {
                Ok(step) => steps.push(step),
                Err(e) => {
                    if let Err(cleanup) = run.overrides_dir().delete().await {
                        warn!("Failed to clean override files for job {}: {}", job.job_id, cleanup);
                    }
                    return Err(e);
                }
            }
        }

        let play = Play {
            name: format!("{} - {}", blueprint.name, job.job_id),
            hosts: HOST_GROUP,
            escalate: true,
            roles: &steps,
        };
        run.playbook_file().write_yaml(&[play]).await?;

        info!(
            job_id = %job.job_id,
            blueprint_id = blueprint.id,
            "Generated plan with {} role(s) in {}",
            steps.len(),
            run.path().display()
        );

        Ok(PlaybookInfo {
            playbook_name: PLAYBOOK_NAME.to_string(),
            playbook_dir: run.path().to_path_buf(),
            blueprint_id: blueprint.id,
            user_id: job.user_id.clone(),
            job_id: job.job_id.clone(),
        })
    }

    /// Write the inventory and the private key files of a job.
    ///
    /// Every credential is checked before anything is written.
    pub async fn generate_inventory(
        &self,
        job: &Job,
        hosts: &[(Host, Credential)],
    ) -> Result<PathBuf, WorkerError> {
        let mut resolved = Vec::with_capacity(hosts.len());
        for (host, credential) in hosts {
            resolved.push((host, credential, check_credential(host, credential)?));
        }

        let run = self.run_dir(job)?;
        run.create().await?;

        let mut inventory = format!("[{}]\n", HOST_GROUP);
        for (host, credential, secret) in resolved {
            let mut line = format!(
                "host{} ansible_host={} ansible_user={}",
                host.id, host.ip, secret.username
            );

            match secret.auth {
                Auth::Key(key) => {
                    let key_file = run.ssh_key_file(host.id, credential.id);
                    let mut contents = key.to_string();
                    if !contents.ends_with('\n') {
                        contents.push('\n');
                    }
                    key_file.write_private(contents.as_bytes()).await?;

                    let key_path = std::path::absolute(key_file.path())?;
                    let _ = write!(line, " ansible_ssh_private_key_file={}", key_path.display());
                }
                Auth::Password(password) => {
                    warn!(
                        job_id = %job.job_id,
                        host_id = host.id,
                        "Credential {} uses password authentication; the password is stored in the inventory file",
                        credential.name
                    );
                    let _ = write!(
                        line,
                        " ansible_password={} ansible_ssh_common_args='-o StrictHostKeyChecking=no'",
                        password
                    );
                }
            }

            line.push_str(" ansible_connection=ssh\n");
            inventory.push_str(&line);
        }

        let inventory_file = run.inventory_file();
        inventory_file.write_private(inventory.as_bytes()).await?;

        info!(job_id = %job.job_id, "Generated inventory with {} host(s)", hosts.len());
        Ok(inventory_file.path().to_path_buf())
    }
}

enum Auth<'a> {
    Key(&'a str),
    Password(&'a str),
}

struct CheckedSecret<'a> {
    username: &'a str,
    auth: Auth<'a>,
}

fn check_credential<'a>(host: &Host, credential: &'a Credential) -> Result<CheckedSecret<'a>, WorkerError> {
    let context = || format!("for host {} (credential: {})", host.id, credential.name);

    let secret: &CredentialSecret = credential
        .value
        .as_ref()
        .ok_or_else(|| WorkerError::InventoryError(format!("credential value is missing {}", context())))?;

    let username = secret
        .username
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| {
            WorkerError::InventoryError(format!("username is missing in credential value {}", context()))
        })?;

    let ssh_key = secret.ssh_key.as_ref().map(|k| k.expose_secret());
    let password = secret.password.as_ref().map(|p| p.expose_secret());

    if ssh_key.is_some_and(|k| k.trim().is_empty()) {
        return Err(WorkerError::InventoryError(format!("SSH key is empty {}", context())));
    }
    if password.is_some_and(|p| p.trim().is_empty()) {
        return Err(WorkerError::InventoryError(format!("password is empty {}", context())));
    }

    let auth = match (ssh_key, password) {
        (Some(key), _) => Auth::Key(key),
        (None, Some(password)) => Auth::Password(password),
        (None, None) => {
            return Err(WorkerError::InventoryError(format!(
                "neither SSH key nor password found in credential value {}",
                context()
            )))
        }
    };

    Ok(CheckedSecret { username, auth })
}
