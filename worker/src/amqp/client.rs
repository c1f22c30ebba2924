//! AMQP client implementation

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};
use url::Url;

use crate::errors::WorkerError;
use crate::workers::consumer::{Delivery, MessageSource};

/// Connection and consumption settings of the job queue
#[derive(Debug, Clone)]
pub struct AmqpQueueOptions {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: String,
    pub password: Option<SecretString>,
    pub vhost: String,

    /// Durable queue the jobs are published to
    pub queue: String,
    pub consumer_tag: String,

    /// Maximum number of unacknowledged deliveries
    pub prefetch: u16,
}

impl Default for AmqpQueueOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            use_tls: false,
            username: "guest".to_string(),
            password: None,
            vhost: "/".to_string(),
            queue: "clouding-plan".to_string(),
            consumer_tag: "clouding-worker".to_string(),
            prefetch: 1,
        }
    }
}

impl AmqpQueueOptions {
    /// Broker URI with the credentials and the escaped vhost
    pub fn uri(&self) -> Result<SecretString, WorkerError> {
        if self.host.is_empty() {
            return Err(WorkerError::ConfigError("AMQP host is not configured".to_string()));
        }

        let scheme = if self.use_tls { "amqps" } else { "amqp" };
        let mut uri = Url::parse(&format!("{}://{}:{}", scheme, self.host, self.port))
            .map_err(|e| WorkerError::ConfigError(format!("invalid AMQP host {}: {}", self.host, e)))?;

        let invalid = |what: &str| WorkerError::ConfigError(format!("invalid AMQP {}", what));
        uri.set_username(&self.username)
            .map_err(|_| invalid("username"))?;
        uri.set_password(self.password.as_ref().map(|p| p.expose_secret()))
            .map_err(|_| invalid("password"))?;
        uri.path_segments_mut()
            .map_err(|_| invalid("vhost"))?
            .clear()
            .push(&self.vhost);

        Ok(SecretString::from(uri.to_string()))
    }
}

fn queue_error(e: lapin::Error) -> WorkerError {
    WorkerError::QueueError(e.to_string())
}

/// Job queue consumer.
///
/// Declares the queue durable and caps unacknowledged deliveries at the
/// configured prefetch. A delivery that is neither acked nor rejected before
/// the channel closes is redelivered by the broker.
pub struct AmqpClient {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

impl AmqpClient {
    /// Connect, declare the job queue and start consuming it
    pub async fn connect(options: &AmqpQueueOptions) -> Result<Self, WorkerError> {
        if options.queue.is_empty() {
            return Err(WorkerError::ConfigError("AMQP queue is not configured".to_string()));
        }
        let uri = options.uri()?;

        let connection = Connection::connect(uri.expose_secret(), ConnectionProperties::default())
            .await
            .map_err(queue_error)?;
        let channel = connection.create_channel().await.map_err(queue_error)?;

        channel
            .basic_qos(options.prefetch, BasicQosOptions::default())
            .await
            .map_err(queue_error)?;
        channel
            .queue_declare(
                &options.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(queue_error)?;

        let consumer = channel
            .basic_consume(
                &options.queue,
                &options.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(queue_error)?;

        info!(
            "Consuming from queue {} on {}:{} (prefetch {})",
            options.queue, options.host, options.port, options.prefetch
        );
        Ok(Self {
            connection,
            channel,
            consumer,
        })
    }
}

#[async_trait]
impl MessageSource for AmqpClient {
    type Token = Acker;

    async fn next(&mut self) -> Result<Option<Delivery<Acker>>, WorkerError> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => {
                debug!(
                    delivery_tag = delivery.delivery_tag,
                    redelivered = delivery.redelivered,
                    "Received job message"
                );
                Ok(Some(Delivery {
                    payload: delivery.data,
                    token: delivery.acker,
                }))
            }
            Some(Err(e)) => Err(queue_error(e)),
            None => Err(WorkerError::QueueError(
                "consumer was cancelled by the broker".to_string(),
            )),
        }
    }

    async fn ack(&mut self, token: Acker) -> Result<(), WorkerError> {
        token
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(queue_error)
    }

    async fn reject(&mut self, token: Acker) -> Result<(), WorkerError> {
        token
            .nack(BasicNackOptions {
                requeue: false,
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(queue_error)
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close(200, "worker shutting down").await {
            debug!("Channel close failed: {}", e);
        }
        if let Err(e) = self.connection.close(200, "worker shutting down").await {
            debug!("Connection close failed: {}", e);
        }
        info!("AMQP disconnected");
    }
}
