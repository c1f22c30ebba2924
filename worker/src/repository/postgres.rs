//! PostgreSQL repository implementation

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};
use tracing::debug;

use crate::deploy::fsm::DeploymentEvent;
use crate::errors::WorkerError;
use crate::models::blueprint::{Blueprint, BlueprintComponent};
use crate::models::deployment::{Deployment, DeploymentStatus, DeploymentType};
use crate::models::host::{Credential, Host};
use crate::repository::{BlueprintRepository, DeploymentRepository, HostRepository};

/// PostgreSQL-backed repository
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Connect to PostgreSQL
    pub async fn connect(
        url: &SecretString,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, WorkerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url.expose_secret())
            .await?;
        Ok(Self { pool })
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn json_column<T: serde::de::DeserializeOwned>(value: Option<Value>) -> Result<Vec<T>, WorkerError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => Ok(serde_json::from_value(value)?),
    }
}

fn transition_sql(event: DeploymentEvent) -> String {
    format!(
        "UPDATE deployments SET status = '{}', updated_at = NOW() WHERE id = $1::uuid AND status = '{}'",
        event.target().as_str(),
        event.precondition().as_str()
    )
}

fn host_status_sql(status: DeploymentStatus) -> String {
    format!(
        "UPDATE deployment_host_mappings SET status = '{}' WHERE deployment_id = $1::uuid AND host_id = ANY($2)",
        status.as_str()
    )
}

async fn update_hosts(
    tx: &mut Transaction<'_, Postgres>,
    deployment_id: &str,
    host_ids: &[i64],
    status: DeploymentStatus,
) -> Result<u64, WorkerError> {
    if host_ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(&host_status_sql(status))
        .bind(deployment_id)
        .bind(host_ids)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl BlueprintRepository for PgRepository {
    async fn get_blueprint(&self, id: i64) -> Result<Option<Blueprint>, WorkerError> {
        let row = sqlx::query("SELECT id, name, status::text AS status FROM blueprints WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Blueprint {
                id: row.try_get("id")?,
                name: row.try_get::<Option<String>, _>("name")?.unwrap_or_default(),
                status: row.try_get::<Option<String>, _>("status")?.unwrap_or_default(),
            })),
            None => Ok(None),
        }
    }

    async fn get_blueprint_components(
        &self,
        blueprint_id: i64,
    ) -> Result<Vec<BlueprintComponent>, WorkerError> {
        let rows = sqlx::query(
            r#"
            SELECT bc.id, bc.position, c.id AS component_id, c.ansible_role,
                   c.parameters AS component_parameters,
                   bc.parameters AS blueprint_parameters
            FROM blueprint_components bc
            JOIN components c ON c.id = bc.component_id
            WHERE bc.blueprint_id = $1
            ORDER BY bc.id
            "#,
        )
        .bind(blueprint_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<BlueprintComponent, WorkerError> {
                Ok(BlueprintComponent {
                    id: row.try_get("id")?,
                    component_id: row.try_get("component_id")?,
                    position: row.try_get("position")?,
                    ansible_role: row.try_get("ansible_role")?,
                    component_parameters: json_column(row.try_get("component_parameters")?)?,
                    blueprint_parameters: json_column(row.try_get("blueprint_parameters")?)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl HostRepository for PgRepository {
    async fn get_hosts_with_credentials(
        &self,
        host_ids: &[i64],
    ) -> Result<Vec<(Host, Credential)>, WorkerError> {
        if host_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT h.id, h.user_id::text AS user_id, h.name, h.ip, h.os,
                   h.credential_id, h.meta_data,
                   c.id AS cred_id, c.name AS cred_name, c.type::text AS cred_type,
                   c.user_id::text AS cred_user_id, c.expires_at AS cred_expires_at
            FROM hosts h
            JOIN credentials c ON h.credential_id = c.id
            WHERE h.id = ANY($1)
            ORDER BY h.id
            "#,
        )
        .bind(host_ids)
        .fetch_all(&self.pool)
        .await?;

        debug!("Resolved {} of {} host(s)", rows.len(), host_ids.len());

        rows.into_iter()
            .map(|row| -> Result<(Host, Credential), WorkerError> {
                let host = Host {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    name: row.try_get("name")?,
                    ip: row.try_get("ip")?,
                    os: row.try_get("os")?,
                    credential_id: row.try_get("credential_id")?,
                    metadata: row.try_get("meta_data")?,
                };
                let credential = Credential {
                    id: row.try_get("cred_id")?,
                    name: row.try_get("cred_name")?,
                    credential_type: row.try_get("cred_type")?,
                    user_id: row.try_get("cred_user_id")?,
                    expires_at: row.try_get::<Option<DateTime<Utc>>, _>("cred_expires_at")?,
                    value: None,
                };
                Ok((host, credential))
            })
            .collect()
    }
}

#[async_trait]
impl DeploymentRepository for PgRepository {
    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, WorkerError> {
        let row = sqlx::query(
            r#"
            SELECT id::text AS id, user_id::text AS user_id, blueprint_id,
                   type::text AS type, status::text AS status, created_at, updated_at
            FROM deployments
            WHERE id = $1::uuid
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let kind: String = row.try_get("type")?;
        let status: String = row.try_get("status")?;
        Ok(Some(Deployment {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            blueprint_id: row.try_get("blueprint_id")?,
            deployment_type: DeploymentType::parse(&kind)
                .ok_or_else(|| WorkerError::Internal(format!("unknown deployment type: {}", kind)))?,
            status: DeploymentStatus::parse(&status)
                .ok_or_else(|| WorkerError::Internal(format!("unknown deployment status: {}", status)))?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn transition_deployment(
        &self,
        id: &str,
        event: DeploymentEvent,
    ) -> Result<bool, WorkerError> {
        let result = sqlx::query(&transition_sql(event))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_deployment_host_status(
        &self,
        deployment_id: &str,
        host_ids: &[i64],
        status: DeploymentStatus,
    ) -> Result<u64, WorkerError> {
        let mut tx = self.pool.begin().await?;
        let changed = update_hosts(&mut tx, deployment_id, host_ids, status).await?;
        tx.commit().await?;
        Ok(changed)
    }

    async fn finalize_deployment(
        &self,
        id: &str,
        completed_hosts: &[i64],
        failed_hosts: &[i64],
        event: DeploymentEvent,
    ) -> Result<bool, WorkerError> {
        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(&transition_sql(event))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            debug!("Deployment {} was already finalized, leaving its hosts untouched", id);
            tx.rollback().await?;
            return Ok(false);
        }

        update_hosts(&mut tx, id, completed_hosts, DeploymentStatus::Completed).await?;
        update_hosts(&mut tx, id, failed_hosts, DeploymentStatus::Failed).await?;

        tx.commit().await?;
        Ok(true)
    }
}
