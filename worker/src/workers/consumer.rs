//! Queue consumer loop
//!
//! Pulls one job at a time from the queue, hands it to intake and settles it
//! once intake is done with it. Runs dispatched by intake keep going on
//! their own tasks while the next job is fetched.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::errors::WorkerError;
use crate::workers::intake::{Disposition, JobIntake};

/// One message pulled off the queue
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    pub payload: Vec<u8>,

    /// Handle used to acknowledge this delivery
    pub token: T,
}

/// A durable queue delivering job messages at least once
#[async_trait]
pub trait MessageSource: Send {
    type Token: Send;

    /// Wait for the next delivery.
    ///
    /// `Ok(None)` means the transport made progress without delivering a job.
    async fn next(&mut self) -> Result<Option<Delivery<Self::Token>>, WorkerError>;

    /// Acknowledge a delivery so the broker stops redelivering it
    async fn ack(&mut self, token: Self::Token) -> Result<(), WorkerError>;

    /// Drop a delivery without requeueing it
    async fn reject(&mut self, token: Self::Token) -> Result<(), WorkerError>;

    async fn close(&mut self) {}
}

/// Consumer options
#[derive(Debug, Clone)]
pub struct Options {
    /// Delay between connection attempts
    pub reconnect_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Run the consumer until the shutdown signal fires
pub async fn run<M, C, CF, S, F>(
    options: &Options,
    connect: C,
    intake: &JobIntake,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    M: MessageSource,
    C: Fn() -> CF,
    CF: Future<Output = Result<M, WorkerError>>,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Queue consumer starting...");

    loop {
        let connected = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Queue consumer shutting down");
                return;
            }
            result = connect() => result,
        };

        let mut source = match connected {
            Ok(source) => source,
            Err(e) => {
                error!("Failed to connect to the job queue: {}", e);
                tokio::select! {
                    _ = &mut shutdown_signal => {
                        info!("Queue consumer shutting down");
                        return;
                    }
                    _ = sleep_fn(options.reconnect_delay) => continue,
                }
            }
        };

        info!("Queue consumer connected");

        loop {
            let next = tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("Queue consumer shutting down");
                    source.close().await;
                    return;
                }
                next = source.next() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    let settled = match intake.on_message(&delivery.payload).await {
                        Disposition::Ack => source.ack(delivery.token).await,
                        Disposition::Reject => {
                            debug!("Dropping rejected message");
                            source.reject(delivery.token).await
                        }
                    };
                    if let Err(e) = settled {
                        warn!("Failed to settle message: {}, reconnecting...", e);
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Job queue error: {}, reconnecting...", e);
                    break;
                }
            }
        }

        source.close().await;

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Queue consumer shutting down");
                return;
            }
            _ = sleep_fn(options.reconnect_delay) => {}
        }
    }
}
