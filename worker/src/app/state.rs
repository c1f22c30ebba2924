//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::deploy::executor::AnsibleRunnerExecutor;
use crate::deploy::tracker::ExecutionTracker;
use crate::errors::WorkerError;
use crate::http::client::HttpClient;
use crate::http::loki::{LogSink, LokiClient, NoopLogSink};
use crate::http::vault::{SecretStore, VaultClient};
use crate::plan::generator::PlanGenerator;
use crate::plan::roles::RoleRegistry;
use crate::repository::postgres::PgRepository;
use crate::repository::Repository;
use crate::storage::layout::RunsLayout;
use crate::workers::intake::JobIntake;

/// Main application state
pub struct AppState {
    /// Database connection pool
    pub repository: Arc<PgRepository>,

    /// Tracker owning every in-flight run
    pub tracker: Arc<ExecutionTracker>,

    /// Job intake used by the queue consumer
    pub intake: Arc<JobIntake>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, WorkerError> {
        info!("Initializing application state...");

        let http = Arc::new(HttpClient::new(options.http_timeout)?);

        let repository = Arc::new(
            PgRepository::connect(
                &options.database.url,
                options.database.max_connections,
                options.database.acquire_timeout,
            )
            .await?,
        );

        let secrets: Arc<dyn SecretStore> = Arc::new(VaultClient::new(
            http.clone(),
            &options.vault.address,
            options.vault.mount.clone(),
            options.vault.token.clone(),
        )?);

        let log_sink: Arc<dyn LogSink> = match &options.loki {
            Some(loki) => Arc::new(LokiClient::new(http.clone(), &loki.endpoint, loki.timeout)?),
            None => {
                info!("Log shipping is not configured");
                Arc::new(NoopLogSink)
            }
        };

        let layout = RunsLayout::new(&options.runs_dir);
        layout.setup().await?;

        let roles = Arc::new(RoleRegistry::with_builtin_roles(http));
        let generator = PlanGenerator::new(roles, layout);

        let shared: Arc<dyn Repository> = repository.clone();
        let tracker = Arc::new(ExecutionTracker::new(
            shared.clone(),
            Arc::new(AnsibleRunnerExecutor::new(options.executor_program.clone())),
            log_sink,
            options.tracker.clone(),
        ));

        let intake = Arc::new(JobIntake::new(shared, secrets, generator, tracker.clone()));

        Ok(Self {
            repository,
            tracker,
            intake,
        })
    }

    /// Stop in-flight runs, then release the database pool
    pub async fn shutdown(&self, max_delay: Duration) -> Result<(), WorkerError> {
        info!("Shutting down application state...");

        let active = self.tracker.active_runs().await;
        if active > 0 {
            info!("Cancelling {} in-flight run(s)", active);
        }
        let result = self.tracker.shutdown(max_delay).await;
        if let Err(e) = &result {
            warn!("{}", e);
        }

        self.repository.close().await;
        result
    }
}
