//! HTTP client implementation

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::WorkerError;

/// HTTP client shared by the override fetcher, the secret store and the log sink
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client with a default request timeout
    pub fn new(timeout: Duration) -> Result<Self, WorkerError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Download a resource verbatim; any non-2xx status is an error
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, WorkerError> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| WorkerError::FetchError(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            error!("Download failed: {} - {}", url, status);
            return Err(WorkerError::FetchError(format!(
                "Failed to download file from {}: {}",
                url, status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| WorkerError::FetchError(format!("{}: {}", url, e)))?;
        Ok(bytes.to_vec())
    }

    /// Make a GET request returning JSON; `404` maps to `None`
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Option<T>, WorkerError> {
        debug!("GET {}", url);

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP GET failed: {} - {}", status, body);
            return Err(WorkerError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let body = response.json().await?;
        Ok(Some(body))
    }

    /// Make a POST request with a JSON body and return the response status.
    ///
    /// `timeout` overrides the client default for this request.
    pub async fn post_json<B: Serialize>(
        &self,
        url: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<StatusCode, WorkerError> {
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(status)
    }
}
