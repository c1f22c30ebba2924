//! Main application run loop

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::amqp::client::AmqpClient;
use crate::app::options::{AppOptions, LifecycleOptions, QueueOptions};
use crate::app::state::AppState;
use crate::errors::WorkerError;
use crate::mqtt::client::MqttClient;
use crate::workers::consumer;

/// Extra time granted on top of the run cancellation delay before forcing exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Run the deployment worker
pub async fn run(
    worker_version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), WorkerError> {
    info!("Initializing clouding worker {}...", worker_version);

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start worker: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), WorkerError> {
    let app_state = Arc::new(AppState::init(options).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    init_consumer_worker(options, app_state, shutdown_manager, shutdown_tx.subscribe()).await
}

async fn init_consumer_worker(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), WorkerError> {
    info!("Initializing queue consumer...");

    let consumer_options = options.consumer.clone();
    let intake = app_state.intake.clone();
    let shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
        let _ = shutdown_rx.recv().await;
    });

    let consumer_handle = match options.queue.clone() {
        QueueOptions::Amqp(amqp_options) => tokio::spawn(async move {
            let queue = &amqp_options;
            consumer::run(
                &consumer_options,
                move || AmqpClient::connect(queue),
                intake.as_ref(),
                tokio::time::sleep,
                shutdown_signal,
            )
            .await;
        }),
        QueueOptions::Mqtt(mqtt_options) => tokio::spawn(async move {
            let queue = &mqtt_options;
            consumer::run(
                &consumer_options,
                move || MqttClient::connect(queue),
                intake.as_ref(),
                tokio::time::sleep,
                shutdown_signal,
            )
            .await;
        }),
    };

    shutdown_manager.with_consumer_handle(consumer_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    consumer_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            consumer_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), WorkerError> {
        if self.app_state.is_some() {
            return Err(WorkerError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_consumer_handle(&mut self, handle: JoinHandle<()>) -> Result<(), WorkerError> {
        if self.consumer_handle.is_some() {
            return Err(WorkerError::ShutdownError("consumer_handle already set".to_string()));
        }
        self.consumer_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), WorkerError> {
        let _ = self.shutdown_tx.send(());

        let max_delay = self.lifecycle_options.max_shutdown_delay + SHUTDOWN_GRACE;
        match tokio::time::timeout(max_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}, forcing shutdown...", max_delay);
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), WorkerError> {
        info!("Shutting down clouding worker...");

        // 1. Stop taking new jobs
        if let Some(handle) = self.consumer_handle.take() {
            handle.await.map_err(|e| WorkerError::ShutdownError(e.to_string()))?;
        }

        // 2. Cancel in-flight runs and close the pool
        if let Some(app_state) = self.app_state.take() {
            app_state
                .shutdown(self.lifecycle_options.max_shutdown_delay)
                .await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
