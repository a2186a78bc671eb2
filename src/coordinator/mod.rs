//! Submit, poll, timeout and cancel lifecycle for one GPU job.
//!
//! A [`TaskCoordinator`] wraps one job kind. Each invocation:
//!
//! 1. writes a best-effort `pre_submit` checkpoint when a sink and state
//!    are configured,
//! 2. submits the request and anchors the elapsed clock,
//! 3. returns at once when the client answered in-process, or polls the
//!    handle until it is ready or the timeout passes,
//! 4. on timeout, requests forceful cancellation exactly once.
//!
//! [`TaskCoordinator::execute`] waits with `tokio::time::sleep`, so other
//! tasks on the caller's runtime keep running while a job is in flight.
//! [`TaskCoordinator::execute_blocking`] sleeps the calling thread and is
//! meant for callers without a runtime. Both share [`poll::PollLoop`] and
//! return the same [`ExecutionResult`]; neither returns an error nor
//! panics.

pub mod outcome;
mod poll;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::checkpoint::{CheckpointMetadata, CheckpointSink, ProgressCallback};
use crate::client::{panic_message, JobClient, Submission};
use crate::config::GpuConfig;
use crate::constants::{GPU_QUEUE, STAGE_PRE_SUBMIT};
use crate::types::{ExecutionResult, JobArgs, JobKind, JobRequest};

pub use outcome::{CancelOutcome, CheckpointOutcome};
use poll::{Clock, PollLoop, Step};

/// Default ceiling on a job's wall time.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);
/// Default delay between readiness probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default minimum spacing between progress callbacks.
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(30);

/// What a [`TaskCoordinator`] runs and how patiently.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Remote task name.
    pub job_name: String,
    /// Lane the job is submitted to.
    pub queue: String,
    /// Label for logs and checkpoint tags.
    pub label: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Minimum spacing between progress callbacks.
    pub checkpoint_interval: Duration,
}

impl CoordinatorConfig {
    pub fn new(job_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            queue: GPU_QUEUE.to_string(),
            label: label.into(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }

    /// Settings for `kind` taken from `config`, including the kind's poll
    /// interval override.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use synde_gpu::{CoordinatorConfig, GpuConfig, JobKind};
    ///
    /// let config = CoordinatorConfig::for_kind(JobKind::FlanExtractor, &GpuConfig::default());
    /// assert_eq!(config.label, "FLAN_Extractor");
    /// assert_eq!(config.poll_interval, Duration::from_secs(2));
    /// assert_eq!(config.timeout, Duration::from_secs(180));
    /// ```
    pub fn for_kind(kind: JobKind, config: &GpuConfig) -> Self {
        Self {
            job_name: kind.task_name().to_string(),
            queue: kind.queue().to_string(),
            label: kind.label().to_string(),
            timeout: config.timeout_for(kind),
            poll_interval: kind
                .poll_interval_override()
                .unwrap_or_else(|| config.poll_interval()),
            checkpoint_interval: config.checkpoint_interval(),
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_checkpoint_interval(mut self, checkpoint_interval: Duration) -> Self {
        self.checkpoint_interval = checkpoint_interval;
        self
    }

    fn request(&self, args: JobArgs) -> JobRequest {
        JobRequest::new(self.job_name.clone(), self.queue.clone(), args)
    }
}

/// Runs one kind of GPU job to completion, timeout or failure.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use synde_gpu::{
///     CoordinatorConfig, ExecutionStatus, GpuConfig, JobArgs, JobKind, OfflineClient,
///     TaskCoordinator,
/// };
///
/// let coordinator = TaskCoordinator::new(
///     Arc::new(OfflineClient::new()),
///     CoordinatorConfig::for_kind(JobKind::Temberture, &GpuConfig::default()),
/// );
/// let result = coordinator.execute_blocking(JobArgs::temberture("MKTAYIAK"));
/// assert_eq!(result.status(), ExecutionStatus::Success);
/// assert_eq!(result.payload().unwrap()["thermo_class"], "mesophilic");
/// ```
pub struct TaskCoordinator {
    client: Arc<dyn JobClient>,
    config: CoordinatorConfig,
    checkpoint: Option<(Arc<dyn CheckpointSink>, Value)>,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for TaskCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCoordinator")
            .field("mode", &self.client.mode())
            .field("config", &self.config)
            .field("checkpoint", &self.checkpoint.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

enum Begin<'a> {
    Done(ExecutionResult),
    Poll(PollLoop<'a>),
}

impl TaskCoordinator {
    pub fn new(client: Arc<dyn JobClient>, config: CoordinatorConfig) -> Self {
        Self {
            client,
            config,
            checkpoint: None,
            progress: None,
        }
    }

    /// Shorthand for `new(client, CoordinatorConfig::for_kind(kind, config))`.
    pub fn for_kind(client: Arc<dyn JobClient>, kind: JobKind, config: &GpuConfig) -> Self {
        Self::new(client, CoordinatorConfig::for_kind(kind, config))
    }

    /// Writes `state` to `sink` before every submission.
    pub fn with_checkpoint(mut self, sink: Arc<dyn CheckpointSink>, state: Value) -> Self {
        self.checkpoint = Some((sink, state));
        self
    }

    /// Calls `progress` while a job is pending, at most once per
    /// checkpoint interval.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Runs the job, yielding to the runtime between polls.
    #[tracing::instrument(skip_all, fields(task = %self.config.label))]
    pub async fn execute(&self, args: JobArgs) -> ExecutionResult {
        let mut poll = match self.begin(args, runtime_now) {
            Begin::Done(result) => return result,
            Begin::Poll(poll) => poll,
        };
        loop {
            match poll.step() {
                Step::Done(result) => return self.finished(result),
                Step::Wait(delay) => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Runs the job, sleeping the calling thread between polls.
    ///
    /// Never call this from inside an async task: it would stall that
    /// runtime worker for the whole job.
    #[tracing::instrument(skip_all, fields(task = %self.config.label))]
    pub fn execute_blocking(&self, args: JobArgs) -> ExecutionResult {
        let mut poll = match self.begin(args, Instant::now) {
            Begin::Done(result) => return result,
            Begin::Poll(poll) => poll,
        };
        loop {
            match poll.step() {
                Step::Done(result) => return self.finished(result),
                Step::Wait(delay) => std::thread::sleep(delay),
            }
        }
    }

    /// Writes the pre-submission checkpoint, if one is configured.
    pub fn checkpoint_before_submit(&self) -> CheckpointOutcome {
        let Some((sink, state)) = &self.checkpoint else {
            return CheckpointOutcome::Skipped;
        };
        let metadata = CheckpointMetadata::new(STAGE_PRE_SUBMIT, self.config.label.clone());
        outcome::write_checkpoint(sink.as_ref(), state, &metadata)
    }

    fn begin(&self, args: JobArgs, clock: Clock) -> Begin<'_> {
        self.checkpoint_before_submit();

        let request = self.config.request(args);
        let started = clock();
        let submission = catch_unwind(AssertUnwindSafe(|| self.client.submit(&request)));
        let elapsed = || clock().saturating_duration_since(started).as_secs_f64();

        match submission {
            Ok(Submission::Pending(handle)) => {
                tracing::info!(task = %self.config.label, handle_id = %handle.id(), queue = %request.queue, "GPU job submitted");
                Begin::Poll(PollLoop {
                    handle,
                    label: &self.config.label,
                    timeout: self.config.timeout,
                    poll_interval: self.config.poll_interval,
                    checkpoint_interval: self.config.checkpoint_interval,
                    progress: self.progress.as_ref(),
                    clock,
                    started,
                    last_progress: started,
                })
            }
            Ok(Submission::Immediate(value)) if self.client.mode().allows_immediate() => {
                tracing::debug!(task = %self.config.label, mode = %self.client.mode(), "job answered in-process");
                ExecutionResult::success(value, None, elapsed()).into()
            }
            Ok(Submission::Immediate(_)) => {
                tracing::warn!(task = %self.config.label, "remote client answered in-process");
                ExecutionResult::failure(
                    format!(
                        "{}: {} client returned an immediate result",
                        self.config.label,
                        self.client.mode()
                    ),
                    None,
                    elapsed(),
                )
                .into()
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(task = %self.config.label, error = %message, "job submission panicked");
                ExecutionResult::failure(format!("submission failed: {message}"), None, elapsed())
                    .into()
            }
        }
    }

    fn finished(&self, result: ExecutionResult) -> ExecutionResult {
        tracing::info!(
            task = %self.config.label,
            status = %result.status(),
            handle_id = result.handle_id().unwrap_or_default(),
            elapsed_secs = result.elapsed_seconds(),
            "GPU job finished"
        );
        result
    }
}

impl From<ExecutionResult> for Begin<'_> {
    fn from(result: ExecutionResult) -> Self {
        Begin::Done(result)
    }
}

fn runtime_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointSink;
    use crate::client::{DispatchMode, OfflineClient};
    use crate::error::CheckpointError;
    use crate::types::ExecutionStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct LyingRemote;

    impl JobClient for LyingRemote {
        fn mode(&self) -> DispatchMode {
            DispatchMode::Remote
        }

        fn submit(&self, _: &JobRequest) -> Submission {
            Submission::Immediate(json!({"value": 1}))
        }
    }

    struct PanickingClient;

    impl JobClient for PanickingClient {
        fn mode(&self) -> DispatchMode {
            DispatchMode::Remote
        }

        fn submit(&self, _: &JobRequest) -> Submission {
            panic!("broker handshake failed")
        }
    }

    struct BrokenSink;

    impl CheckpointSink for BrokenSink {
        fn put(&self, _: &Value, _: &CheckpointMetadata) -> Result<String, CheckpointError> {
            Err(CheckpointError::Sink("read-only filesystem".to_string()))
        }
    }

    #[test]
    fn for_kind_reads_timeouts_and_poll_override() {
        let mut config = GpuConfig::default();
        config.timeouts.esmfold_secs = 600;
        config.timeouts.poll_interval_secs = 1.5;

        let esmfold = CoordinatorConfig::for_kind(JobKind::Esmfold, &config);
        assert_eq!(esmfold.job_name, "home.tasks.run_esmfold_job");
        assert_eq!(esmfold.queue, "gpu");
        assert_eq!(esmfold.timeout, Duration::from_secs(600));
        assert_eq!(esmfold.poll_interval, Duration::from_millis(1500));

        let flan = CoordinatorConfig::for_kind(JobKind::FlanExtractor, &config);
        assert_eq!(flan.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn immediate_value_from_remote_client_is_a_failure() {
        let coordinator = TaskCoordinator::new(
            Arc::new(LyingRemote),
            CoordinatorConfig::new("stub.value", "Stub"),
        );
        let result = coordinator.execute_blocking(JobArgs::new());
        assert_eq!(result.status(), ExecutionStatus::Failure);
        assert!(result.error().unwrap().contains("immediate result"));
    }

    #[test]
    fn panicking_submit_becomes_failure() {
        let coordinator = TaskCoordinator::new(
            Arc::new(PanickingClient),
            CoordinatorConfig::new("stub.value", "Stub"),
        );
        let result = coordinator.execute_blocking(JobArgs::new());
        assert_eq!(result.status(), ExecutionStatus::Failure);
        assert!(result.error().unwrap().contains("broker handshake failed"));
    }

    #[test]
    fn offline_run_checkpoints_before_submitting() {
        let sink = Arc::new(MemoryCheckpointSink::new());
        let client = Arc::new(OfflineClient::new());
        let coordinator = TaskCoordinator::for_kind(
            client.clone(),
            JobKind::CleanEc,
            &GpuConfig::default(),
        )
        .with_checkpoint(sink.clone(), json!({"stage": "ec", "sequence": "MKT"}));

        let result = coordinator.execute_blocking(JobArgs::clean_ec("MKT", Some("query")));
        assert_eq!(result.status(), ExecutionStatus::Success);
        assert_eq!(result.handle_id(), None);
        assert_eq!(result.payload().unwrap()["seq_name"], json!("query"));

        let snapshot = sink.latest().unwrap();
        assert_eq!(snapshot.metadata.stage, "pre_submit");
        assert_eq!(snapshot.metadata.task, "CLEAN_EC");
        assert_eq!(snapshot.state["sequence"], json!("MKT"));
        assert_eq!(client.submitted().len(), 1);
    }

    #[test]
    fn failing_sink_does_not_block_submission() {
        let client = Arc::new(OfflineClient::new());
        let coordinator = TaskCoordinator::for_kind(
            client.clone(),
            JobKind::Temberture,
            &GpuConfig::default(),
        )
        .with_checkpoint(Arc::new(BrokenSink), json!({}));

        assert!(matches!(
            coordinator.checkpoint_before_submit(),
            CheckpointOutcome::Failed(_)
        ));
        let result = coordinator.execute_blocking(JobArgs::temberture("MKT"));
        assert!(result.is_success());
        assert_eq!(client.submitted().len(), 1);
    }

    #[test]
    fn no_sink_means_skipped_checkpoint() {
        let coordinator = TaskCoordinator::new(
            Arc::new(OfflineClient::new()),
            CoordinatorConfig::new("stub.value", "Stub"),
        );
        assert_eq!(coordinator.checkpoint_before_submit(), CheckpointOutcome::Skipped);
    }

    #[cfg(feature = "logging")]
    #[test]
    fn blocking_driver_runs_inside_a_task_span() {
        use tracing_subscriber::layer::{Context, SubscriberExt};
        use tracing_subscriber::Layer;

        #[derive(Clone, Default)]
        struct SpanLog(Arc<parking_lot::Mutex<Vec<(String, String)>>>);

        impl<S: tracing::Subscriber> Layer<S> for SpanLog {
            fn on_new_span(
                &self,
                attrs: &tracing::span::Attributes<'_>,
                _: &tracing::span::Id,
                _: Context<'_, S>,
            ) {
                let name = attrs.metadata().name().to_string();
                let fields = attrs
                    .metadata()
                    .fields()
                    .iter()
                    .map(|field| field.name())
                    .collect::<Vec<_>>()
                    .join(",");
                self.0.lock().push((name, fields));
            }
        }

        let spans = SpanLog::default();
        let subscriber = tracing_subscriber::registry().with(spans.clone());
        tracing::subscriber::with_default(subscriber, || {
            TaskCoordinator::for_kind(
                Arc::new(OfflineClient::new()),
                JobKind::Temberture,
                &GpuConfig::default(),
            )
            .execute_blocking(JobArgs::temberture("MKT"));
        });

        let spans = spans.0.lock();
        assert!(
            spans
                .iter()
                .any(|(name, fields)| name == "execute_blocking" && fields == "task"),
            "{spans:?}"
        );
    }
}
