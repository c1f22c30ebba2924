//! Secret store backed by Vault KV v2

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::errors::WorkerError;
use crate::http::client::HttpClient;

/// Name-keyed secret lookup
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the secret stored under `name`; `None` when it does not exist
    async fn lookup(&self, name: &str) -> Result<Option<Map<String, Value>>, WorkerError>;
}

#[derive(Debug, Deserialize)]
struct KvResponse {
    data: KvData,
}

#[derive(Debug, Deserialize)]
struct KvData {
    #[serde(default)]
    data: Option<Map<String, Value>>,
}

/// Vault client reading from a KV v2 mount
pub struct VaultClient {
    http: Arc<HttpClient>,
    address: Url,
    mount: String,
    token: SecretString,
}

impl VaultClient {
    pub fn new(
        http: Arc<HttpClient>,
        address: &str,
        mount: impl Into<String>,
        token: SecretString,
    ) -> Result<Self, WorkerError> {
        let address = Url::parse(address)
            .map_err(|e| WorkerError::ConfigError(format!("invalid vault address {}: {}", address, e)))?;
        Ok(Self {
            http,
            address,
            mount: mount.into(),
            token,
        })
    }

    fn secret_url(&self, name: &str) -> Result<Url, WorkerError> {
        let mut url = self.address.clone();
        url.path_segments_mut()
            .map_err(|_| WorkerError::ConfigError(format!("vault address cannot be a base: {}", self.address)))?
            .pop_if_empty()
            .extend(["v1", self.mount.as_str(), "data", name]);
        Ok(url)
    }
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn lookup(&self, name: &str) -> Result<Option<Map<String, Value>>, WorkerError> {
        let url = self.secret_url(name)?;
        debug!("Reading secret {}", name);

        let response: Option<KvResponse> = self
            .http
            .get_json(url.as_str(), &[("X-Vault-Token", self.token.expose_secret())])
            .await
            .map_err(|e| WorkerError::SecretStoreError(format!("failed to read secret {}: {}", name, e)))?;

        Ok(response.and_then(|r| r.data.data))
    }
}
