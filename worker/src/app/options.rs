//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::deploy::tracker::TrackerOptions;
use crate::errors::WorkerError;
use crate::amqp::client::AmqpQueueOptions;
use crate::mqtt::client::{MqttAddress, MqttQueueOptions};
use crate::storage::settings::{QueueTransport, Settings};
use crate::workers::consumer;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Postgres connection
    pub database: DatabaseOptions,

    /// Job queue connection and subscription
    pub queue: QueueOptions,

    /// Queue consumer options
    pub consumer: consumer::Options,

    /// Secret store
    pub vault: VaultOptions,

    /// Log shipping; disabled when `None`
    pub loki: Option<LokiOptions>,

    /// Root of the per-job run directories
    pub runs_dir: PathBuf,

    /// Executor program
    pub executor_program: String,

    /// Execution tracker options
    pub tracker: TrackerOptions,

    /// Timeout of outbound HTTP requests
    pub http_timeout: Duration,
}

impl AppOptions {
    /// Build options from a settings file, failing on missing required values
    pub fn from_settings(settings: &Settings) -> Result<Self, WorkerError> {
        let database_url = settings.database.url.clone().ok_or_else(|| {
            WorkerError::ConfigError("database url is not configured (set DATABASE_URL)".to_string())
        })?;

        let vault_address = settings.vault.address.clone().ok_or_else(|| {
            WorkerError::ConfigError("vault address is not configured (set VAULT_ADDR)".to_string())
        })?;
        let vault_token = settings.vault.token.clone().ok_or_else(|| {
            WorkerError::ConfigError("vault token is not configured (set VAULT_TOKEN)".to_string())
        })?;

        let loki = settings
            .loki
            .endpoint
            .clone()
            .filter(|endpoint| !endpoint.is_empty())
            .map(|endpoint| LokiOptions {
                endpoint,
                timeout: Duration::from_millis(settings.loki.timeout_ms),
            });

        let queue = match settings.queue.transport {
            QueueTransport::Amqp => {
                let amqp = &settings.amqp;
                QueueOptions::Amqp(AmqpQueueOptions {
                    host: amqp.host.clone(),
                    port: amqp.port,
                    use_tls: amqp.tls,
                    username: amqp.username.clone(),
                    password: amqp.password.clone(),
                    vhost: amqp.vhost.clone(),
                    queue: amqp.queue.clone(),
                    consumer_tag: amqp.consumer_tag.clone(),
                    ..Default::default()
                })
            }
            QueueTransport::Mqtt => {
                let broker = &settings.broker;
                QueueOptions::Mqtt(MqttQueueOptions {
                    address: MqttAddress {
                        host: broker.host.clone(),
                        port: broker.port,
                        use_tls: broker.tls,
                        ca_cert_path: broker.ca_cert_path.clone(),
                    },
                    client_id: broker.client_id.clone(),
                    job_topic: broker.job_topic.clone(),
                    share_group: broker.share_group.clone(),
                    username: broker.username.clone(),
                    password: broker.password.clone(),
                    ..Default::default()
                })
            }
        };

        Ok(Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.lifecycle.max_shutdown_delay_secs),
            },
            database: DatabaseOptions {
                url: database_url,
                max_connections: settings.database.max_connections,
                acquire_timeout: Duration::from_secs(settings.database.acquire_timeout_secs),
            },
            queue,
            consumer: consumer::Options {
                reconnect_delay: Duration::from_secs(settings.queue.reconnect_delay_secs),
            },
            vault: VaultOptions {
                address: vault_address,
                mount: settings.vault.mount.clone(),
                token: vault_token,
            },
            loki,
            runs_dir: PathBuf::from(&settings.runs.base_dir),
            executor_program: settings.executor.program.clone(),
            tracker: TrackerOptions {
                run_timeout: Duration::from_secs(settings.executor.run_timeout_secs),
            },
            http_timeout: Duration::from_secs(30),
        })
    }
}

/// Job queue transport and its connection options
#[derive(Debug, Clone)]
pub enum QueueOptions {
    Amqp(AmqpQueueOptions),
    Mqtt(MqttQueueOptions),
}

/// Lifecycle options for the worker
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub url: SecretString,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct VaultOptions {
    pub address: String,
    pub mount: String,
    pub token: SecretString,
}

#[derive(Debug, Clone)]
pub struct LokiOptions {
    pub endpoint: String,
    pub timeout: Duration,
}
