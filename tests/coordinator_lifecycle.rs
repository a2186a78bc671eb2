//! End-to-end coordinator lifecycle tests.
//!
//! Each scenario runs through both drivers: `execute` on a paused Tokio
//! clock and `execute_blocking` on the real one. Jobs are scripted so the
//! readiness probe that flips them is known in advance.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use synde_gpu::{
    CheckpointError, CheckpointMetadata, CheckpointSink, CoordinatorConfig, ExecutionStatus,
    GpuConfig, JobArgs, JobKind, MemoryCheckpointSink, OfflineClient, ProgressCallback,
    ProgressPhase, TaskCoordinator,
};

use common::{Script, ScriptedClient};

fn stub_config() -> CoordinatorConfig {
    CoordinatorConfig::new("stub.value", "Stub")
        .with_timeout(Duration::from_secs(1))
        .with_poll_interval(Duration::from_millis(100))
}

fn coordinator(client: &Arc<ScriptedClient>) -> TaskCoordinator {
    TaskCoordinator::new(client.clone(), stub_config())
}

// ─── Offline ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn offline_success_returns_immediately() {
    let client = Arc::new(
        OfflineClient::new().with_response("stub.value", json!({"status": "success", "value": 42})),
    );
    let coordinator = TaskCoordinator::new(client, stub_config());

    let result = coordinator.execute(JobArgs::new()).await;
    assert_eq!(result.status(), ExecutionStatus::Success);
    assert_eq!(
        result.payload(),
        Some(&json!({"status": "success", "value": 42}))
    );
    assert!(result.elapsed_seconds() < 0.5);
    assert!(result.error().is_none());
}

#[test]
fn offline_success_blocking() {
    let coordinator = TaskCoordinator::for_kind(
        Arc::new(OfflineClient::new()),
        JobKind::Esmfold,
        &GpuConfig::default(),
    );
    let result = coordinator.execute_blocking(JobArgs::esmfold("job-1", "MKTAYIAK"));
    assert_eq!(result.status(), ExecutionStatus::Success);
    assert_eq!(
        result.payload().unwrap()["pdb_path"],
        json!("/mock/esmfold/job-1.pdb")
    );
    assert!(result.elapsed_seconds() < 0.5);
}

// ─── Remote success ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn remote_success_after_three_polls() {
    let client = ScriptedClient::new(Script::Succeed(json!({"value": 42})), 3);
    let result = coordinator(&client).execute(JobArgs::new().arg(1)).await;

    assert_eq!(result.status(), ExecutionStatus::Success);
    assert_eq!(result.payload(), Some(&json!({"value": 42})));
    assert_eq!(result.handle_id(), Some("task-1"));
    assert!(result.elapsed_seconds() >= 0.2, "{}", result.elapsed_seconds());
    assert!(result.elapsed_seconds() < 1.0);
    assert_eq!(client.probes.ready_checks(), 3);
    assert_eq!(client.probes.cancels(), 0);

    let submitted = client.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].name, "stub.value");
    assert_eq!(submitted[0].queue, "gpu");
}

#[test]
fn remote_success_after_three_polls_blocking() {
    let client = ScriptedClient::new(Script::Succeed(json!({"value": 42})), 3);
    let result = coordinator(&client).execute_blocking(JobArgs::new());

    assert_eq!(result.status(), ExecutionStatus::Success);
    assert_eq!(result.payload(), Some(&json!({"value": 42})));
    assert!(result.elapsed_seconds() >= 0.2, "{}", result.elapsed_seconds());
    assert_eq!(client.probes.ready_checks(), 3);
}

// ─── Remote failure ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn remote_failure_carries_failure_info() {
    let client = ScriptedClient::new(Script::Fail(Some("bad input".to_string())), 2);
    let result = coordinator(&client).execute(JobArgs::new()).await;

    assert_eq!(result.status(), ExecutionStatus::Failure);
    assert_eq!(result.error(), Some("bad input"));
    assert!(result.payload().is_none());
    assert_eq!(result.handle_id(), Some("task-1"));
}

#[tokio::test(start_paused = true)]
async fn failure_without_info_is_unknown_error() {
    let client = ScriptedClient::new(Script::Fail(None), 1);
    let result = coordinator(&client).execute(JobArgs::new()).await;

    assert_eq!(result.status(), ExecutionStatus::Failure);
    assert_eq!(result.error(), Some("Unknown error"));
}

#[test]
fn failure_without_info_is_unknown_error_blocking() {
    let client = ScriptedClient::new(Script::Fail(Some(String::new())), 1);
    let result = coordinator(&client).execute_blocking(JobArgs::new());

    assert_eq!(result.status(), ExecutionStatus::Failure);
    assert_eq!(result.error(), Some("Unknown error"));
}

#[tokio::test(start_paused = true)]
async fn value_error_becomes_failure() {
    let client = ScriptedClient::new(Script::ValueRaises("result expired".to_string()), 1);
    let result = coordinator(&client).execute(JobArgs::new()).await;

    assert_eq!(result.status(), ExecutionStatus::Failure);
    assert!(result.error().unwrap().contains("result expired"));
    assert!(result.payload().is_none());
}

#[test]
fn probe_error_becomes_failure_blocking() {
    let client = ScriptedClient::new(Script::ProbeRaises("broker went away".to_string()), 1);
    let result = coordinator(&client).execute_blocking(JobArgs::new());

    assert_eq!(result.status(), ExecutionStatus::Failure);
    assert!(result.error().unwrap().contains("broker went away"));
    assert_eq!(client.probes.ready_checks(), 1);
}

// ─── Timeout ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn hung_job_times_out_and_is_cancelled_once() {
    let client = ScriptedClient::new(Script::Hang, 0);
    let result = coordinator(&client).execute(JobArgs::new()).await;

    assert_eq!(result.status(), ExecutionStatus::Timeout);
    assert_eq!(result.error(), Some("Task timed out after 1s"));
    assert!(result.payload().is_none());
    assert!(result.elapsed_seconds() > 1.0, "{}", result.elapsed_seconds());
    assert!(result.elapsed_seconds() < 1.5);
    assert_eq!(client.probes.cancels(), 1);
    assert!(client.probes.forced());
}

#[tokio::test(start_paused = true)]
async fn timeout_shorter_than_poll_interval_is_honoured() {
    let client = ScriptedClient::new(Script::Hang, 0);
    let config = stub_config().with_poll_interval(Duration::from_secs(5));
    let result = TaskCoordinator::new(client.clone(), config)
        .execute(JobArgs::new())
        .await;

    assert_eq!(result.status(), ExecutionStatus::Timeout);
    assert!(result.elapsed_seconds() > 1.0, "{}", result.elapsed_seconds());
    assert!(result.elapsed_seconds() < 1.1, "{}", result.elapsed_seconds());
    assert_eq!(client.probes.ready_checks(), 1);
    assert_eq!(client.probes.cancels(), 1);
}

#[test]
fn hung_job_times_out_blocking() {
    let client = ScriptedClient::new(Script::Hang, 0);
    let result = coordinator(&client).execute_blocking(JobArgs::new());

    assert_eq!(result.status(), ExecutionStatus::Timeout);
    assert_eq!(result.error(), Some("Task timed out after 1s"));
    assert!(result.elapsed_seconds() > 1.0);
    assert!(result.elapsed_seconds() < 2.0);
    assert_eq!(client.probes.cancels(), 1);
    assert!(client.probes.forced());
}

// ─── Scheduling ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn pending_job_does_not_block_other_tasks() {
    let ticks = Arc::new(AtomicU32::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(50)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let client = ScriptedClient::new(Script::Succeed(json!(1)), 6);
    let result = coordinator(&client).execute(JobArgs::new()).await;
    ticker.abort();

    assert!(result.is_success());
    // Six probes span 500ms of polling; the ticker fires every 50ms.
    assert!(ticks.load(Ordering::SeqCst) >= 8, "{}", ticks.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn progress_is_reported_while_pending() {
    let calls: Arc<Mutex<Vec<(String, ProgressPhase, f64)>>> = Arc::default();
    let progress: ProgressCallback = {
        let calls = calls.clone();
        Arc::new(move |handle_id: &str, phase: ProgressPhase, elapsed: f64| {
            calls
                .lock()
                .unwrap()
                .push((handle_id.to_string(), phase, elapsed));
        })
    };

    let client = ScriptedClient::new(Script::Succeed(json!(1)), 8);
    let coordinator = TaskCoordinator::new(
        client.clone(),
        stub_config().with_checkpoint_interval(Duration::from_millis(250)),
    )
    .with_progress(progress);

    let result = coordinator.execute(JobArgs::new()).await;
    assert!(result.is_success());

    let calls = calls.lock().unwrap();
    assert!(!calls.is_empty());
    assert!(calls.len() <= 3, "{calls:?}");
    for (handle_id, phase, elapsed) in calls.iter() {
        assert_eq!(handle_id, "task-1");
        assert_eq!(*phase, ProgressPhase::Started);
        assert!(*elapsed >= 0.25);
    }
}

#[tokio::test(start_paused = true)]
async fn checkpoint_precedes_remote_submission() {
    let sink = Arc::new(MemoryCheckpointSink::new());
    let client = ScriptedClient::new(Script::Succeed(json!(1)), 1);
    let coordinator = coordinator(&client).with_checkpoint(sink.clone(), json!({"job_id": "job-9"}));

    coordinator.execute(JobArgs::new()).await;
    coordinator.execute(JobArgs::new()).await;

    let snapshots = sink.list(Some("pre_submit"));
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots.iter().all(|s| s.metadata.task == "Stub"));
    assert_eq!(client.submitted().len(), 2);
}

// ─── Checkpoints ────────────────────────────────────────────────────────────

/// Records how many submissions the client had seen at each checkpoint.
struct OrderingSink {
    client: Arc<ScriptedClient>,
    seen: Mutex<Vec<usize>>,
}

impl CheckpointSink for OrderingSink {
    fn put(&self, _: &Value, _: &CheckpointMetadata) -> Result<String, CheckpointError> {
        let mut seen = self.seen.lock().unwrap();
        seen.push(self.client.submitted().len());
        Ok(format!("ordered-{}", seen.len()))
    }
}

struct FailingSink;

impl CheckpointSink for FailingSink {
    fn put(&self, _: &Value, _: &CheckpointMetadata) -> Result<String, CheckpointError> {
        Err(CheckpointError::Sink("bucket unavailable".to_string()))
    }
}

#[test]
fn checkpoint_is_written_strictly_before_each_submission() {
    let client = ScriptedClient::new(Script::Succeed(json!(1)), 1);
    let sink = Arc::new(OrderingSink {
        client: client.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let coordinator = coordinator(&client).with_checkpoint(sink.clone(), json!({}));

    coordinator.execute_blocking(JobArgs::new());
    coordinator.execute_blocking(JobArgs::new());

    assert_eq!(*sink.seen.lock().unwrap(), vec![0, 1]);
}

#[tokio::test(start_paused = true)]
async fn failing_sink_leaves_every_outcome_unchanged() {
    let scripts = [
        (Script::Succeed(json!({"value": 42})), ExecutionStatus::Success),
        (Script::Fail(Some("bad input".to_string())), ExecutionStatus::Failure),
        (Script::Hang, ExecutionStatus::Timeout),
    ];
    for (script, expected) in scripts {
        let client = ScriptedClient::new(script, 2);
        let result = coordinator(&client)
            .with_checkpoint(Arc::new(FailingSink), json!({"job_id": "job-5"}))
            .execute(JobArgs::new())
            .await;
        assert_eq!(result.status(), expected);
        assert_eq!(client.submitted().len(), 1);
    }
}
