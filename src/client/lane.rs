//! A dedicated worker lane for job handlers.
//!
//! [`LaneClient`] owns a multi-threaded Tokio runtime whose threads are
//! named after the lane (`gpu-lane`). Submitted jobs run there, never on
//! the caller's scheduler. Each job gets a [`LaneHandle`] backed by shared
//! state the worker updates when the handler finishes.
//!
//! Forced cancellation aborts the worker task outright. Unforced
//! cancellation only trips the job's [`CancellationToken`], which a
//! handler may or may not observe.

use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{panic_message, DispatchMode, JobClient, JobHandle, Submission};
use crate::error::JobError;
use crate::types::JobRequest;

/// What a handler receives.
#[derive(Debug, Clone)]
pub struct LaneJob {
    pub request: JobRequest,
    /// Tripped by an unforced cancel.
    pub cancel: CancellationToken,
}

/// A registered job implementation.
pub type LaneHandler =
    Arc<dyn Fn(LaneJob) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

#[derive(Debug, Clone)]
enum LaneState {
    Running,
    Succeeded(Value),
    Failed(String),
    Cancelled,
}

/// Handle to a job running on a [`LaneClient`].
#[derive(Debug)]
pub struct LaneHandle {
    id: String,
    state: Arc<Mutex<LaneState>>,
    abort: Option<AbortHandle>,
    cancel: CancellationToken,
}

impl LaneHandle {
    fn failed(message: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: Arc::new(Mutex::new(LaneState::Failed(message))),
            abort: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl JobHandle for LaneHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_ready(&self) -> Result<bool, JobError> {
        Ok(!matches!(*self.state.lock(), LaneState::Running))
    }

    fn succeeded(&self) -> Result<bool, JobError> {
        Ok(matches!(*self.state.lock(), LaneState::Succeeded(_)))
    }

    fn value(&self) -> Result<Value, JobError> {
        match &*self.state.lock() {
            LaneState::Succeeded(value) => Ok(value.clone()),
            _ => Err(JobError::NoValue {
                handle_id: self.id.clone(),
            }),
        }
    }

    fn failure_info(&self) -> Result<Option<String>, JobError> {
        Ok(match &*self.state.lock() {
            LaneState::Failed(message) => Some(message.clone()),
            LaneState::Cancelled => Some("job cancelled".to_string()),
            LaneState::Running | LaneState::Succeeded(_) => None,
        })
    }

    fn cancel(&self, force: bool) -> Result<(), JobError> {
        self.cancel.cancel();
        if force {
            if let Some(abort) = &self.abort {
                abort.abort();
            }
            let mut state = self.state.lock();
            if matches!(*state, LaneState::Running) {
                *state = LaneState::Cancelled;
            }
        }
        tracing::debug!(handle_id = %self.id, force, "lane job cancel requested");
        Ok(())
    }
}

/// A [`JobClient`] that runs registered handlers on its own lane.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use synde_gpu::client::{JobClient, LaneClient, Submission};
/// use synde_gpu::{JobArgs, JobKind};
///
/// let lane = LaneClient::new("gpu").unwrap();
/// lane.register(JobKind::Temberture.task_name(), |_job| async {
///     Ok(json!({"melting_temperature": 61.0}))
/// });
/// let submission = lane.submit(&JobKind::Temberture.request(JobArgs::temberture("MKT")));
/// assert!(matches!(submission, Submission::Pending(_)));
/// ```
pub struct LaneClient {
    queue: String,
    runtime: Option<Runtime>,
    handle: Handle,
    handlers: DashMap<String, LaneHandler>,
}

impl std::fmt::Debug for LaneClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaneClient")
            .field("queue", &self.queue)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl LaneClient {
    /// Starts a lane serving `queue` on its own runtime.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the runtime cannot be built.
    pub fn new(queue: impl Into<String>) -> io::Result<Self> {
        let queue = queue.into();
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name(format!("{queue}-lane"))
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            queue,
            runtime: Some(runtime),
            handle,
            handlers: DashMap::new(),
        })
    }

    /// A lane serving `queue` on an existing runtime.
    pub fn with_handle(queue: impl Into<String>, handle: Handle) -> Self {
        Self {
            queue: queue.into(),
            runtime: None,
            handle,
            handlers: DashMap::new(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Registers the implementation of `task_name`, replacing any earlier one.
    pub fn register<F, Fut>(&self, task_name: impl Into<String>, handler: F)
    where
        F: Fn(LaneJob) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let handler: LaneHandler = Arc::new(move |job| handler(job).boxed());
        self.handlers.insert(task_name.into(), handler);
    }
}

impl JobClient for LaneClient {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Remote
    }

    fn submit(&self, request: &JobRequest) -> Submission {
        if request.queue != self.queue {
            tracing::warn!(task = %request.name, queue = %request.queue, lane = %self.queue, "job routed to the wrong lane");
            return Submission::Pending(Box::new(LaneHandle::failed(format!(
                "job {} is routed to queue '{}' but this lane serves '{}'",
                request.name, request.queue, self.queue
            ))));
        }
        let Some(handler) = self.handlers.get(&request.name).map(|h| Arc::clone(h.value())) else {
            return Submission::Pending(Box::new(LaneHandle::failed(format!(
                "no handler registered for {}",
                request.name
            ))));
        };

        let id = Uuid::new_v4().to_string();
        let state = Arc::new(Mutex::new(LaneState::Running));
        let cancel = CancellationToken::new();
        let job = LaneJob {
            request: request.clone(),
            cancel: cancel.clone(),
        };

        let shared = Arc::clone(&state);
        let task_id = id.clone();
        let task = self.handle.spawn(async move {
            let outcome = AssertUnwindSafe(async move { handler(job).await })
                .catch_unwind()
                .await;
            let finished = match outcome {
                Ok(Ok(value)) => LaneState::Succeeded(value),
                Ok(Err(message)) => LaneState::Failed(message),
                Err(panic) => LaneState::Failed(format!(
                    "handler panicked: {}",
                    panic_message(panic.as_ref())
                )),
            };
            let mut state = shared.lock();
            if matches!(*state, LaneState::Running) {
                *state = finished;
            }
            tracing::debug!(handle_id = %task_id, "lane job finished");
        });

        tracing::debug!(task = %request.name, handle_id = %id, lane = %self.queue, "lane job submitted");
        Submission::Pending(Box::new(LaneHandle {
            id,
            state,
            abort: Some(task.abort_handle()),
            cancel,
        }))
    }
}

impl Drop for LaneClient {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
