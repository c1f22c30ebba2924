//! Execution tracker
//!
//! Drives one executor run per dispatched job, aggregates per-host outcomes from
//! the event stream and persists them through guarded transitions. Runs are
//! independent tasks; each owns its aggregator and reads its events
//! sequentially from a single channel.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::deploy::events::{EventRecord, ExecutorEvent};
use crate::deploy::executor::{ExecutionSpec, Executor};
use crate::deploy::fsm::DeploymentEvent;
use crate::errors::WorkerError;
use crate::http::loki::LogSink;
use crate::models::deployment::{DeploymentType, PlaybookInfo};
use crate::repository::Repository;

const EVENT_BUFFER: usize = 64;

/// Hand-off from intake to the tracker
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub playbook: PlaybookInfo,
    pub deployment_type: DeploymentType,
    /// Every host targeted by the job
    pub host_ids: Vec<i64>,
}

impl RunRequest {
    pub fn job_id(&self) -> &str {
        &self.playbook.job_id
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The deployment was not pending; nothing ran
    Skipped,
    Completed,
    Failed,
    /// Cut short before the run stats arrived
    Aborted(String),
}

/// Per-run host outcome sets
#[derive(Debug, Default, Clone)]
pub struct RunAggregator {
    succeeded: BTreeSet<i64>,
    failed: BTreeSet<i64>,
    finalized: bool,
}

impl RunAggregator {
    pub fn record(&mut self, host_id: i64, failed: bool) {
        if failed {
            self.failed.insert(host_id);
        } else {
            self.succeeded.insert(host_id);
        }
    }

    /// `(completed, failed)` host ids; a host that ever failed stays failed
    pub fn outcome(&self) -> (Vec<i64>, Vec<i64>) {
        let completed = self.succeeded.difference(&self.failed).copied().collect();
        let failed = self.failed.iter().copied().collect();
        (completed, failed)
    }

    /// Outcome of a run that never finished: every targeted host that has not
    /// succeeded is failed
    pub fn aborted_outcome(&self, targeted: &[i64]) -> (Vec<i64>, Vec<i64>) {
        let (completed, _) = self.outcome();
        let mut failed: BTreeSet<i64> = targeted.iter().copied().collect();
        failed.extend(self.failed.iter().copied());
        for host in &completed {
            failed.remove(host);
        }
        (completed, failed.into_iter().collect())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// Tracker settings
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Hard deadline of a single run
    pub run_timeout: Duration,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(3600),
        }
    }
}

pub struct ExecutionTracker {
    repository: Arc<dyn Repository>,
    executor: Arc<dyn Executor>,
    log_sink: Arc<dyn LogSink>,
    options: TrackerOptions,
    cancel: watch::Sender<bool>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionTracker {
    pub fn new(
        repository: Arc<dyn Repository>,
        executor: Arc<dyn Executor>,
        log_sink: Arc<dyn LogSink>,
        options: TrackerOptions,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            repository,
            executor,
            log_sink,
            options,
            cancel,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Start a run on its own task and return immediately
    pub async fn dispatch(self: Arc<Self>, request: RunRequest) {
        let tracker = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let job_id = request.job_id().to_string();
            match tracker.run(request).await {
                Ok(outcome) => info!(job_id = %job_id, "Run finished: {:?}", outcome),
                Err(e) => error!(job_id = %job_id, "Run failed: {}", e),
            }
        });

        let mut in_flight = self.in_flight.lock().await;
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    /// Number of dispatched runs still going
    pub async fn active_runs(&self) -> usize {
        self.in_flight
            .lock()
            .await
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Wait for every dispatched run to finish
    pub async fn wait_idle(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.in_flight.lock().await);
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Run task panicked: {}", e);
            }
        }
    }

    /// Cancel in-flight runs and wait for them to record their outcome
    pub async fn shutdown(&self, max_delay: Duration) -> Result<(), WorkerError> {
        self.cancel.send_replace(true);
        tokio::time::timeout(max_delay, self.wait_idle())
            .await
            .map_err(|_| WorkerError::ShutdownError("runs did not stop in time".to_string()))
    }

    /// Execute one run to completion
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome, WorkerError> {
        let job_id = request.job_id().to_string();

        if !self
            .repository
            .transition_deployment(&job_id, DeploymentEvent::Start)
            .await?
        {
            info!(job_id = %job_id, "Skipping run: deployment is not pending or does not exist");
            return Ok(RunOutcome::Skipped);
        }

        let spec = ExecutionSpec::for_playbook(&request.playbook, request.deployment_type);
        let mut cancel = self.cancel.subscribe();
        let mut aggregator = RunAggregator::default();

        let interrupted = {
            let (tx, rx) = mpsc::channel(EVENT_BUFFER);
            let execution = async {
                let (ran, consumed) = tokio::join!(
                    self.executor.run(&spec, tx),
                    self.consume(&job_id, rx, &mut aggregator)
                );
                consumed.and(ran)
            };

            tokio::select! {
                result = execution => result.err().map(|e| e.to_string()),
                _ = tokio::time::sleep(self.options.run_timeout) => {
                    Some(format!("run exceeded {:?}", self.options.run_timeout))
                }
                _ = cancelled(&mut cancel) => {
                    Some("run cancelled".to_string())
                }
            }
        };

        if aggregator.is_finalized() {
            let (_, failed) = aggregator.outcome();
            if let Some(reason) = interrupted {
                warn!(job_id = %job_id, "Run ended after its stats were recorded: {}", reason);
            }
            return Ok(if failed.is_empty() {
                RunOutcome::Completed
            } else {
                RunOutcome::Failed
            });
        }

        let reason = interrupted.unwrap_or_else(|| "executor finished without run stats".to_string());
        warn!(job_id = %job_id, "Aborting run: {}", reason);

        let (completed, failed) = aggregator.aborted_outcome(&request.host_ids);
        self.repository
            .finalize_deployment(&job_id, &completed, &failed, DeploymentEvent::Fail)
            .await?;

        Ok(RunOutcome::Aborted(reason))
    }

    async fn consume(
        &self,
        job_id: &str,
        mut events: mpsc::Receiver<ExecutorEvent>,
        aggregator: &mut RunAggregator,
    ) -> Result<(), WorkerError> {
        while let Some(event) = events.recv().await {
            self.handle_event(job_id, &event, aggregator).await?;
        }
        Ok(())
    }

    /// Apply one executor event to the run state
    pub async fn handle_event(
        &self,
        job_id: &str,
        event: &ExecutorEvent,
        aggregator: &mut RunAggregator,
    ) -> Result<(), WorkerError> {
        let Some(record) = event.record() else {
            debug!(job_id = %job_id, "Ignoring event {}", event.event);
            return Ok(());
        };

        match &record {
            EventRecord::Task(_) if aggregator.finalized => {
                warn!(job_id = %job_id, "Ignoring {} after run stats", event.event);
            }
            EventRecord::Task(task) => match task.host_id() {
                Some(host_id) => aggregator.record(host_id, event.kind().is_failure()),
                None => warn!(job_id = %job_id, "Event {} has no usable host id: {:?}", task.event, task.host),
            },
            EventRecord::Stats(_) if aggregator.finalized => {
                warn!(job_id = %job_id, "Ignoring repeated run stats");
            }
            EventRecord::Stats(_) => {
                let (completed, failed) = aggregator.outcome();
                let event = DeploymentEvent::for_outcome(!failed.is_empty());
                let transitioned = self
                    .repository
                    .finalize_deployment(job_id, &completed, &failed, event)
                    .await?;
                aggregator.finalized = true;

                info!(
                    job_id = %job_id,
                    transitioned,
                    "Recorded {} completed and {} failed host(s)",
                    completed.len(),
                    failed.len()
                );
            }
        }

        if let Err(e) = self.log_sink.push(job_id, &record.to_json()).await {
            warn!(job_id = %job_id, "Failed to ship execution log: {}", e);
        }
        Ok(())
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}
