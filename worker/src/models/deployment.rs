//! Deployment models

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Kind of run requested by a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentType {
    /// Dry run (check + diff)
    Plan,

    /// Apply changes
    Deploy,
}

impl DeploymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentType::Plan => "plan",
            DeploymentType::Deploy => "deploy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(DeploymentType::Plan),
            "deploy" => Some(DeploymentType::Deploy),
            _ => None,
        }
    }
}

/// Status shared by deployments and deployment/host mappings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Started,
    Completed,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Started => "started",
            DeploymentStatus::Completed => "completed",
            DeploymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeploymentStatus::Pending),
            "started" => Some(DeploymentStatus::Started),
            "completed" => Some(DeploymentStatus::Completed),
            "failed" => Some(DeploymentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Completed | DeploymentStatus::Failed)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued deployment, one per job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Same value as the job id
    pub id: String,
    pub user_id: String,
    pub blueprint_id: i64,
    pub deployment_type: DeploymentType,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reasons an inbound job message is rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message is not valid JSON: {0}")]
    Malformed(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {field} has the wrong type: expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("invalid type: {0}")]
    InvalidType(String),

    #[error("hostIds must be a list")]
    HostIdsNotList,

    #[error("all hostIds must be integers")]
    HostIdNotInteger,
}

/// A validated job pulled off the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub job_id: String,
    pub host_ids: Vec<i64>,
    pub blueprint_id: i64,
    pub user_id: String,
    pub deployment_type: DeploymentType,
}

impl Job {
    /// Parse and validate a raw queue payload
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| MessageError::Malformed(e.to_string()))?;
        let object = value.as_object().ok_or(MessageError::Malformed(
            "expected a JSON object".to_string(),
        ))?;

        // Presence of every field is checked before any type check.
        let mut fields = Vec::with_capacity(5);
        for name in ["jobId", "hostIds", "blueprintId", "userId", "type"] {
            match object.get(name) {
                Some(v) if !v.is_null() => fields.push(v),
                _ => return Err(MessageError::MissingField(name)),
            }
        }
        let &[job_id, host_ids, blueprint_id, user_id, kind] = fields.as_slice() else {
            return Err(MessageError::Malformed("unexpected field layout".to_string()));
        };

        let kind = kind.as_str().ok_or(MessageError::WrongType {
            field: "type",
            expected: "string",
        })?;
        let deployment_type =
            DeploymentType::parse(kind).ok_or_else(|| MessageError::InvalidType(kind.to_string()))?;

        let host_ids = host_ids
            .as_array()
            .ok_or(MessageError::HostIdsNotList)?
            .iter()
            .map(|id| id.as_i64().ok_or(MessageError::HostIdNotInteger))
            .collect::<Result<Vec<_>, _>>()?;

        let job_id = job_id.as_str().ok_or(MessageError::WrongType {
            field: "jobId",
            expected: "string",
        })?;
        let user_id = user_id.as_str().ok_or(MessageError::WrongType {
            field: "userId",
            expected: "string",
        })?;
        let blueprint_id = blueprint_id.as_i64().ok_or(MessageError::WrongType {
            field: "blueprintId",
            expected: "integer",
        })?;

        Ok(Self {
            job_id: job_id.to_string(),
            host_ids,
            blueprint_id,
            user_id: user_id.to_string(),
            deployment_type,
        })
    }
}

/// Generated artifact descriptor handed from intake to the execution tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybookInfo {
    pub playbook_name: String,
    pub playbook_dir: PathBuf,
    pub blueprint_id: i64,
    pub user_id: String,
    pub job_id: String,
}
