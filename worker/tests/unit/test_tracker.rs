//! Execution tracker tests

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clouding_worker::deploy::executor::Executor;
use clouding_worker::deploy::fsm::DeploymentEvent;
use clouding_worker::deploy::tracker::{
    ExecutionTracker, RunAggregator, RunOutcome, RunRequest, TrackerOptions,
};
use clouding_worker::http::loki::LogSink;
use clouding_worker::models::deployment::{DeploymentStatus, DeploymentType, PlaybookInfo};
use clouding_worker::repository::DeploymentRepository;
use clouding_worker::testing::{InMemoryRepository, RecordingLogSink, ScriptedExecutor};

use crate::fixtures::{stats_event, task_event};

fn request(job_id: &str, host_ids: &[i64], deployment_type: DeploymentType) -> RunRequest {
    RunRequest {
        playbook: PlaybookInfo {
            playbook_name: "main.yaml".to_string(),
            playbook_dir: PathBuf::from("runs/u1").join(job_id),
            blueprint_id: 10,
            user_id: "u1".to_string(),
            job_id: job_id.to_string(),
        },
        deployment_type,
        host_ids: host_ids.to_vec(),
    }
}

struct Harness {
    repository: Arc<InMemoryRepository>,
    executor: Arc<ScriptedExecutor>,
    log_sink: Arc<RecordingLogSink>,
    tracker: Arc<ExecutionTracker>,
}

fn harness(executor: ScriptedExecutor, log_sink: RecordingLogSink, run_timeout: Duration) -> Harness {
    let repository = Arc::new(InMemoryRepository::new());
    repository.add_deployment("j1", "u1", 10, DeploymentType::Deploy, &[1, 2]);

    let executor = Arc::new(executor);
    let log_sink = Arc::new(log_sink);
    let tracker = Arc::new(ExecutionTracker::new(
        repository.clone(),
        executor.clone() as Arc<dyn Executor>,
        log_sink.clone() as Arc<dyn LogSink>,
        TrackerOptions { run_timeout },
    ));

    Harness {
        repository,
        executor,
        log_sink,
        tracker,
    }
}

#[tokio::test]
async fn test_terminal_aggregation() {
    let h = harness(
        ScriptedExecutor::new(vec![
            task_event("runner_on_ok", 1),
            task_event("runner_on_failed", 2),
            stats_event(),
        ]),
        RecordingLogSink::new(),
        Duration::from_secs(5),
    );

    let outcome = h
        .tracker
        .run(request("j1", &[1, 2], DeploymentType::Deploy))
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Failed);
    assert_eq!(h.repository.host_status("j1", 1), Some(DeploymentStatus::Completed));
    assert_eq!(h.repository.host_status("j1", 2), Some(DeploymentStatus::Failed));
    assert_eq!(h.repository.deployment_status("j1"), Some(DeploymentStatus::Failed));
    assert_eq!(
        h.repository.transitions("j1"),
        vec![
            (DeploymentStatus::Pending, DeploymentStatus::Started),
            (DeploymentStatus::Started, DeploymentStatus::Failed),
        ]
    );

    let records = h.log_sink.records();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|(job_id, _)| job_id == "j1"));
    assert_eq!(records[1].1["event"], "runner_on_failed");
    assert_eq!(records[1].1["host"], "host2");
    assert_eq!(records[2].1["event"], "playbook_on_stats");
}

#[tokio::test]
async fn test_clean_run_completes() {
    let h = harness(
        ScriptedExecutor::new(vec![
            task_event("runner_on_ok", 1),
            task_event("runner_on_ok", 2),
            stats_event(),
        ]),
        RecordingLogSink::new(),
        Duration::from_secs(5),
    );

    let outcome = h
        .tracker
        .run(request("j1", &[1, 2], DeploymentType::Plan))
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(h.repository.deployment_status("j1"), Some(DeploymentStatus::Completed));
    assert_eq!(h.executor.runs()[0].extra_args, vec!["--check", "--diff"]);
}

#[tokio::test]
async fn test_unreachable_host_counts_as_failed() {
    let h = harness(
        ScriptedExecutor::new(vec![
            task_event("runner_on_ok", 1),
            task_event("runner_on_ok", 2),
            task_event("runner_on_unreachable", 2),
            stats_event(),
        ]),
        RecordingLogSink::new(),
        Duration::from_secs(5),
    );

    let outcome = h
        .tracker
        .run(request("j1", &[1, 2], DeploymentType::Deploy))
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Failed);
    assert_eq!(h.repository.host_status("j1", 2), Some(DeploymentStatus::Failed));
}

#[tokio::test]
async fn test_duplicate_start_is_noop() {
    let repository = InMemoryRepository::new();
    repository.add_deployment("j1", "u1", 10, DeploymentType::Deploy, &[1]);

    assert!(repository
        .transition_deployment("j1", DeploymentEvent::Start)
        .await
        .unwrap());
    assert!(!repository
        .transition_deployment("j1", DeploymentEvent::Start)
        .await
        .unwrap());

    assert_eq!(repository.deployment_status("j1"), Some(DeploymentStatus::Started));
    assert_eq!(repository.transitions("j1").len(), 1);
}

#[tokio::test]
async fn test_declined_finalize_leaves_hosts_untouched() {
    let repository = InMemoryRepository::new();
    repository.add_deployment("j1", "u1", 10, DeploymentType::Deploy, &[1]);
    repository
        .transition_deployment("j1", DeploymentEvent::Start)
        .await
        .unwrap();

    assert!(repository
        .finalize_deployment("j1", &[1], &[], DeploymentEvent::Complete)
        .await
        .unwrap());
    assert!(!repository
        .finalize_deployment("j1", &[], &[1], DeploymentEvent::Fail)
        .await
        .unwrap());

    assert_eq!(repository.deployment_status("j1"), Some(DeploymentStatus::Completed));
    assert_eq!(repository.host_status("j1", 1), Some(DeploymentStatus::Completed));
}

#[tokio::test]
async fn test_finalize_without_start_writes_nothing() {
    let repository = InMemoryRepository::new();
    repository.add_deployment("j1", "u1", 10, DeploymentType::Deploy, &[1, 2]);

    assert!(!repository
        .finalize_deployment("j1", &[1], &[2], DeploymentEvent::Fail)
        .await
        .unwrap());

    assert_eq!(repository.deployment_status("j1"), Some(DeploymentStatus::Pending));
    assert_eq!(repository.host_status("j1", 1), Some(DeploymentStatus::Pending));
    assert_eq!(repository.host_status("j1", 2), Some(DeploymentStatus::Pending));
}

#[tokio::test]
async fn test_started_deployment_is_skipped() {
    let h = harness(
        ScriptedExecutor::new(vec![stats_event()]),
        RecordingLogSink::new(),
        Duration::from_secs(5),
    );
    h.repository
        .transition_deployment("j1", DeploymentEvent::Start)
        .await
        .unwrap();

    let outcome = h
        .tracker
        .run(request("j1", &[1, 2], DeploymentType::Deploy))
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Skipped);
    assert!(h.executor.runs().is_empty());
    assert_eq!(h.repository.deployment_status("j1"), Some(DeploymentStatus::Started));
}

#[tokio::test]
async fn test_run_deadline_aborts_and_fails_unreported_hosts() {
    let h = harness(
        ScriptedExecutor::hanging(vec![task_event("runner_on_ok", 1)]),
        RecordingLogSink::new(),
        Duration::from_millis(200),
    );

    let outcome = h
        .tracker
        .run(request("j1", &[1, 2], DeploymentType::Deploy))
        .await
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Aborted(ref reason) if reason.contains("exceeded")));
    assert_eq!(h.repository.host_status("j1", 1), Some(DeploymentStatus::Completed));
    assert_eq!(h.repository.host_status("j1", 2), Some(DeploymentStatus::Failed));
    assert_eq!(h.repository.deployment_status("j1"), Some(DeploymentStatus::Failed));
}

#[tokio::test]
async fn test_executor_without_stats_is_aborted() {
    let h = harness(
        ScriptedExecutor::new(vec![task_event("runner_on_ok", 1)]),
        RecordingLogSink::new(),
        Duration::from_secs(5),
    );

    let outcome = h
        .tracker
        .run(request("j1", &[1, 2], DeploymentType::Deploy))
        .await
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Aborted(_)));
    assert_eq!(h.repository.deployment_status("j1"), Some(DeploymentStatus::Failed));
    assert_eq!(h.repository.finalize_calls(), 1);
}

#[tokio::test]
async fn test_events_after_stats_are_ignored() {
    let h = harness(
        ScriptedExecutor::new(vec![
            task_event("runner_on_ok", 1),
            stats_event(),
            task_event("runner_on_failed", 2),
            stats_event(),
        ]),
        RecordingLogSink::new(),
        Duration::from_secs(5),
    );

    let outcome = h
        .tracker
        .run(request("j1", &[1, 2], DeploymentType::Deploy))
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(h.repository.finalize_calls(), 1);
    assert_eq!(h.repository.deployment_status("j1"), Some(DeploymentStatus::Completed));
}

#[tokio::test]
async fn test_log_sink_failures_do_not_affect_state() {
    let h = harness(
        ScriptedExecutor::new(vec![task_event("runner_on_ok", 1), stats_event()]),
        RecordingLogSink::failing(),
        Duration::from_secs(5),
    );

    let outcome = h
        .tracker
        .run(request("j1", &[1], DeploymentType::Deploy))
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(h.log_sink.records().len(), 2);
    assert_eq!(h.repository.deployment_status("j1"), Some(DeploymentStatus::Completed));
}

#[tokio::test]
async fn test_shutdown_cancels_dispatched_runs() {
    let h = harness(
        ScriptedExecutor::hanging(vec![task_event("runner_on_ok", 1)]),
        RecordingLogSink::new(),
        Duration::from_secs(60),
    );

    h.tracker
        .clone()
        .dispatch(request("j1", &[1, 2], DeploymentType::Deploy))
        .await;

    // Wait for the run to start before cancelling it.
    for _ in 0..50 {
        if h.repository.deployment_status("j1") == Some(DeploymentStatus::Started) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    h.tracker.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(h.tracker.active_runs().await, 0);
    assert_eq!(h.repository.deployment_status("j1"), Some(DeploymentStatus::Failed));
    assert_eq!(h.repository.host_status("j1", 2), Some(DeploymentStatus::Failed));
}

#[test]
fn test_aggregator_failure_sticks() {
    let mut aggregator = RunAggregator::default();
    aggregator.record(1, true);
    aggregator.record(1, false);

    assert_eq!(aggregator.outcome(), (vec![], vec![1]));
}
