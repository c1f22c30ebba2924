//! Log sink shipping execution records to Loki

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::{json, Value};
use url::Url;

use crate::errors::WorkerError;
use crate::http::client::HttpClient;

/// Best-effort destination for per-job execution records
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn push(&self, job_id: &str, record: &Value) -> Result<(), WorkerError>;
}

/// Sink used when log shipping is not configured
pub struct NoopLogSink;

#[async_trait]
impl LogSink for NoopLogSink {
    async fn push(&self, _job_id: &str, _record: &Value) -> Result<(), WorkerError> {
        Ok(())
    }
}

pub struct LokiClient {
    http: Arc<HttpClient>,
    push_url: Url,
    timeout: Duration,
}

impl LokiClient {
    pub fn new(http: Arc<HttpClient>, endpoint: &str, timeout: Duration) -> Result<Self, WorkerError> {
        let mut push_url = Url::parse(endpoint)
            .map_err(|e| WorkerError::ConfigError(format!("invalid loki endpoint {}: {}", endpoint, e)))?;
        push_url
            .path_segments_mut()
            .map_err(|_| WorkerError::ConfigError(format!("loki endpoint cannot be a base: {}", endpoint)))?
            .pop_if_empty()
            .extend(["loki", "api", "v1", "push"]);
        Ok(Self {
            http,
            push_url,
            timeout,
        })
    }
}

/// Build a single-entry push body labelled with the job id
pub fn push_body(job_id: &str, record: &Value, timestamp_nanos: i64) -> Value {
    json!({
        "streams": [{
            "stream": { "jobId": job_id },
            "values": [[timestamp_nanos.to_string(), record.to_string()]]
        }]
    })
}

#[async_trait]
impl LogSink for LokiClient {
    async fn push(&self, job_id: &str, record: &Value) -> Result<(), WorkerError> {
        let now = Utc::now();
        let nanos = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros() * 1000);
        let body = push_body(job_id, record, nanos);

        let status = self
            .http
            .post_json(self.push_url.as_str(), &body, self.timeout)
            .await?;

        if status != StatusCode::NO_CONTENT {
            return Err(WorkerError::UnexpectedStatus {
                url: self.push_url.to_string(),
                status: status.as_u16(),
                body: String::new(),
            });
        }
        Ok(())
    }
}
