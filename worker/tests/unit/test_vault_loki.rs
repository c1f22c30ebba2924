//! Secret store and log sink HTTP tests

use std::sync::Arc;
use std::time::Duration;

use clouding_worker::errors::WorkerError;
use clouding_worker::http::client::HttpClient;
use clouding_worker::http::loki::{LogSink, LokiClient};
use clouding_worker::http::vault::{SecretStore, VaultClient};
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http() -> Arc<HttpClient> {
    Arc::new(HttpClient::new(Duration::from_secs(5)).unwrap())
}

fn vault(server: &MockServer) -> VaultClient {
    VaultClient::new(
        http(),
        &server.uri(),
        "secret",
        SecretString::from("root-token".to_string()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_vault_returns_kv_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/ssh-main-u1"))
        .and(header("X-Vault-Token", "root-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "data": {"username": "root", "sshKey": "KEY"},
                "metadata": {"version": 3}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let secret = vault(&server).lookup("ssh-main-u1").await.unwrap().unwrap();

    assert_eq!(secret["username"], "root");
    assert_eq!(secret["sshKey"], "KEY");
}

#[tokio::test]
async fn test_vault_missing_secret_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(vault(&server).lookup("nobody-u1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_vault_failure_is_secret_store_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("sealed"))
        .mount(&server)
        .await;

    let err = vault(&server).lookup("ssh-main-u1").await.unwrap_err();

    assert!(matches!(err, WorkerError::SecretStoreError(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_loki_push_labels_stream_with_job_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/loki/api/v1/push"))
        .and(body_partial_json(json!({"streams": [{"stream": {"jobId": "j1"}}]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = LokiClient::new(http(), &server.uri(), Duration::from_secs(3)).unwrap();
    client
        .push("j1", &json!({"event": "runner_on_ok", "host": "host1"}))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_loki_rejects_unexpected_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = LokiClient::new(http(), &server.uri(), Duration::from_secs(3)).unwrap();
    let err = client.push("j1", &json!({"event": "x"})).await.unwrap_err();

    assert!(matches!(err, WorkerError::UnexpectedStatus { status: 200, .. }));
}
