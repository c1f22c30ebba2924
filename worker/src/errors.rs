//! Error types for the deployment worker

use thiserror::Error;

use crate::plan::validator::ParameterError;

/// Main error type for the deployment worker
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Unexpected HTTP status {status} from {url}: {body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(#[from] ParameterError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unsupported role: {0}")]
    UnsupportedRole(String),

    #[error("Inventory error: {0}")]
    InventoryError(String),

    #[error("Secret store error: {0}")]
    SecretStoreError(String),

    #[error("Fetch error: {0}")]
    FetchError(String),

    #[error("Executor error: {0}")]
    ExecutorError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    /// Whether the error stems from bad input rather than a failing collaborator.
    ///
    /// Input errors never become valid on redelivery.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WorkerError::InvalidParameter(_)
                | WorkerError::ValidationError(_)
                | WorkerError::UnsupportedRole(_)
                | WorkerError::InventoryError(_)
                | WorkerError::NotFound(_)
        )
    }

    /// Whether the error came from a network or storage collaborator.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WorkerError::HttpError(_)
                | WorkerError::UnexpectedStatus { .. }
                | WorkerError::DatabaseError(_)
                | WorkerError::SecretStoreError(_)
                | WorkerError::FetchError(_)
                | WorkerError::QueueError(_)
        )
    }
}
