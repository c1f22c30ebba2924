//! Settings file management

use std::env;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Worker settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log output configuration
    #[serde(default)]
    pub log: LogSettings,

    /// Postgres configuration
    #[serde(default)]
    pub database: DatabaseSettings,

    /// Job queue transport selection
    #[serde(default)]
    pub queue: QueueSettings,

    /// AMQP broker configuration
    #[serde(default)]
    pub amqp: AmqpSettings,

    /// MQTT broker configuration
    #[serde(default)]
    pub broker: BrokerSettings,

    /// Secret store configuration
    #[serde(default)]
    pub vault: VaultSettings,

    /// Log shipping configuration
    #[serde(default)]
    pub loki: LokiSettings,

    /// Run directory configuration
    #[serde(default)]
    pub runs: RunsSettings,

    /// Executor configuration
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Process lifecycle
    #[serde(default)]
    pub lifecycle: LifecycleSettings,
}

impl Settings {
    /// Override values from the process environment
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| env::var(name).ok().filter(|v| !v.is_empty()));
    }

    /// Override values from an arbitrary variable lookup
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(SecretString::from(url));
        }
        if let Some(address) = lookup("VAULT_ADDR") {
            self.vault.address = Some(address);
        }
        if let Some(token) = lookup("VAULT_TOKEN") {
            self.vault.token = Some(SecretString::from(token));
        }
        if let Some(mount) = lookup("VAULT_SECRET_ENGINE") {
            self.vault.mount = mount;
        }
        if let Some(host) = lookup("RABBITMQ_HOST") {
            self.amqp.host = host;
        }
        if let Some(port) = lookup("RABBITMQ_PORT").and_then(|p| p.parse().ok()) {
            self.amqp.port = port;
        }
        if let Some(username) = lookup("RABBITMQ_USER") {
            self.amqp.username = username;
        }
        if let Some(password) = lookup("RABBITMQ_PASSWORD") {
            self.amqp.password = Some(SecretString::from(password));
        }
        if let Some(vhost) = lookup("RABBITMQ_VHOST") {
            self.amqp.vhost = vhost;
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.broker.password = Some(SecretString::from(password));
        }
        if let Some(endpoint) = lookup("LOKI_ENDPOINT") {
            self.loki.endpoint = Some(endpoint);
        }
    }
}

fn default_true() -> bool {
    true
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Write logs to stdout
    #[serde(default = "default_true")]
    pub stdout: bool,

    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,

    /// Directory for daily rolling log files; disabled when absent
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            stdout: true,
            json: false,
            log_dir: None,
        }
    }
}

/// Postgres settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Connection URL (usually supplied through `DATABASE_URL`)
    #[serde(default, skip_serializing)]
    pub url: Option<SecretString>,

    /// Pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    10
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

/// Transport the job queue is consumed over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueTransport {
    #[default]
    Amqp,
    Mqtt,
}

/// Job queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default)]
    pub transport: QueueTransport,

    /// Seconds to wait before reconnecting after a broker error
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_reconnect_delay() -> u64 {
    5
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            transport: QueueTransport::default(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

/// AMQP broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmqpSettings {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_amqp_port")]
    pub port: u16,

    /// Use `amqps`
    #[serde(default)]
    pub tls: bool,

    #[serde(default = "default_amqp_username")]
    pub username: String,

    /// Password (usually supplied through `RABBITMQ_PASSWORD`)
    #[serde(default, skip_serializing)]
    pub password: Option<SecretString>,

    #[serde(default = "default_amqp_vhost")]
    pub vhost: String,

    /// Durable queue the jobs are published to
    #[serde(default = "default_amqp_queue")]
    pub queue: String,

    #[serde(default = "default_client_id")]
    pub consumer_tag: String,
}

fn default_amqp_port() -> u16 {
    5672
}

fn default_amqp_username() -> String {
    "guest".to_string()
}

fn default_amqp_vhost() -> String {
    "/".to_string()
}

fn default_amqp_queue() -> String {
    "clouding-plan".to_string()
}

impl Default for AmqpSettings {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_amqp_port(),
            tls: false,
            username: default_amqp_username(),
            password: None,
            vhost: default_amqp_vhost(),
            queue: default_amqp_queue(),
            consumer_tag: default_client_id(),
        }
    }
}

/// MQTT broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Broker host
    #[serde(default = "default_broker_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Use TLS
    #[serde(default)]
    pub tls: bool,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    /// Client id; must be stable for the persistent session to survive restarts
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Topic jobs are published on
    #[serde(default = "default_job_topic")]
    pub job_topic: String,

    /// Optional shared subscription group
    #[serde(default)]
    pub share_group: Option<String>,

    /// Optional username
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password (usually supplied through `MQTT_PASSWORD`)
    #[serde(default, skip_serializing)]
    pub password: Option<SecretString>,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "clouding-worker".to_string()
}

fn default_job_topic() -> String {
    "deployments/jobs".to_string()
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            tls: false,
            ca_cert_path: None,
            client_id: default_client_id(),
            job_topic: default_job_topic(),
            share_group: None,
            username: None,
            password: None,
        }
    }
}

/// Vault settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSettings {
    /// Server address, e.g. `https://vault:8200`
    #[serde(default)]
    pub address: Option<String>,

    /// Access token (usually supplied through `VAULT_TOKEN`)
    #[serde(default, skip_serializing)]
    pub token: Option<SecretString>,

    /// KV v2 mount
    #[serde(default = "default_vault_mount")]
    pub mount: String,
}

fn default_vault_mount() -> String {
    "secret".to_string()
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            address: None,
            token: None,
            mount: default_vault_mount(),
        }
    }
}

/// Loki settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LokiSettings {
    /// Push endpoint base URL; log shipping is disabled when absent
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Per-push timeout in milliseconds
    #[serde(default = "default_loki_timeout")]
    pub timeout_ms: u64,
}

fn default_loki_timeout() -> u64 {
    3000
}

impl Default for LokiSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: default_loki_timeout(),
        }
    }
}

/// Run directory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsSettings {
    #[serde(default = "default_runs_dir")]
    pub base_dir: String,
}

fn default_runs_dir() -> String {
    "runs".to_string()
}

impl Default for RunsSettings {
    fn default() -> Self {
        Self {
            base_dir: default_runs_dir(),
        }
    }
}

/// Executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Program spawned for each run
    #[serde(default = "default_executor_program")]
    pub program: String,

    /// Hard deadline for a single run
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

fn default_executor_program() -> String {
    "ansible-runner".to_string()
}

fn default_run_timeout() -> u64 {
    3600
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            program: default_executor_program(),
            run_timeout_secs: default_run_timeout(),
        }
    }
}

/// Lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSettings {
    /// Maximum delay for graceful shutdown
    #[serde(default = "default_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,
}

fn default_shutdown_delay() -> u64 {
    30
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            max_shutdown_delay_secs: default_shutdown_delay(),
        }
    }
}
