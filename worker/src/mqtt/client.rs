//! MQTT client implementation

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::errors::WorkerError;
use crate::mqtt::topics::Topics;
use crate::workers::consumer::{Delivery, MessageSource};

/// MQTT broker address
#[derive(Debug, Clone)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
}

impl Default for MqttAddress {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            use_tls: false,
            ca_cert_path: None,
        }
    }
}

/// Connection and subscription settings of the job queue
#[derive(Debug, Clone)]
pub struct MqttQueueOptions {
    pub address: MqttAddress,
    pub client_id: String,
    pub job_topic: String,
    pub share_group: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub keep_alive: Duration,
}

impl Default for MqttQueueOptions {
    fn default() -> Self {
        Self {
            address: MqttAddress::default(),
            client_id: "clouding-worker".to_string(),
            job_topic: "deployments/jobs".to_string(),
            share_group: None,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// Job queue subscriber, the alternative to the AMQP consumer.
///
/// Uses a persistent session with manual acknowledgements: a job that was
/// delivered but never acknowledged is redelivered after a reconnect. Jobs
/// published before the session first exists are not retained.
pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttClient {
    /// Create a new MQTT client
    pub fn new(options: &MqttQueueOptions) -> Result<Self, WorkerError> {
        let address = &options.address;
        if address.host.is_empty() {
            return Err(WorkerError::QueueError("MQTT host is not configured".to_string()));
        }
        if options.client_id.is_empty() {
            return Err(WorkerError::QueueError(
                "a client id is required for a persistent session".to_string(),
            ));
        }

        let mut mqtt_options = MqttOptions::new(&options.client_id, &address.host, address.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(false);
        mqtt_options.set_manual_acks(true);

        if let Some(username) = &options.username {
            let password = options
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_default();
            mqtt_options.set_credentials(username, password);
        }

        if address.use_tls {
            use rumqttc::{TlsConfiguration, Transport};
            use rustls::ClientConfig;
            use std::sync::Arc;

            let mut root_cert_store = rustls::RootCertStore::empty();

            if let Some(ref ca_path) = address.ca_cert_path {
                let ca_pem = std::fs::read(ca_path).map_err(|e| {
                    WorkerError::QueueError(format!("Failed to read CA cert {ca_path}: {e}"))
                })?;
                let mut cursor = std::io::Cursor::new(ca_pem);
                for cert in rustls_pemfile::certs(&mut cursor).flatten() {
                    let _ = root_cert_store.add(cert);
                }
            } else {
                for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
                    let _ = root_cert_store.add(cert);
                }
            }

            let client_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            mqtt_options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(client_config),
            )));
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, 10);
        Ok(Self { client, eventloop })
    }

    /// Connect and subscribe to the job topic
    pub async fn connect(options: &MqttQueueOptions) -> Result<Self, WorkerError> {
        if !Topics::is_valid_topic(&options.job_topic) {
            return Err(WorkerError::ConfigError(format!(
                "invalid job topic: {}",
                options.job_topic
            )));
        }

        let client = Self::new(options)?;
        let filter = Topics::job_subscription(&options.job_topic, options.share_group.as_deref());
        client
            .client
            .subscribe(&filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| WorkerError::QueueError(e.to_string()))?;
        info!("Subscribed to: {}", filter);
        Ok(client)
    }

    /// Poll for events
    pub async fn poll(&mut self) -> Result<Option<Publish>, WorkerError> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("Received message on topic: {}", publish.topic);
                Ok(Some(publish))
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("MQTT connected (session present: {})", ack.session_present);
                Ok(None)
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Subscription acknowledged");
                Ok(None)
            }
            Ok(_) => Ok(None),
            Err(e) => {
                warn!("MQTT poll error: {}", e);
                Err(WorkerError::QueueError(e.to_string()))
            }
        }
    }

    /// Disconnect from broker
    pub async fn disconnect(&mut self) -> Result<(), WorkerError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| WorkerError::QueueError(e.to_string()))?;
        info!("MQTT disconnected");
        Ok(())
    }
}

#[async_trait]
impl MessageSource for MqttClient {
    type Token = Publish;

    async fn next(&mut self) -> Result<Option<Delivery<Publish>>, WorkerError> {
        Ok(self.poll().await?.map(|publish| Delivery {
            payload: publish.payload.to_vec(),
            token: publish,
        }))
    }

    async fn ack(&mut self, token: Publish) -> Result<(), WorkerError> {
        self.client
            .ack(&token)
            .await
            .map_err(|e| WorkerError::QueueError(e.to_string()))?;
        // Sent by the event loop on the next poll.
        Ok(())
    }

    async fn reject(&mut self, token: Publish) -> Result<(), WorkerError> {
        // MQTT has no negative acknowledgement; acking drops the message.
        debug!("Discarding rejected message from {}", token.topic);
        self.ack(token).await
    }

    async fn close(&mut self) {
        if let Err(e) = self.disconnect().await {
            debug!("Disconnect failed: {}", e);
        }
    }
}
