//! Deterministic same-process stand-ins for GPU jobs.
//!
//! [`OfflineClient`] answers every submission immediately with a canned
//! response for the task name, so pipelines can run end to end without a
//! GPU worker.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{DispatchMode, JobClient, Submission};
use crate::types::{JobKind, JobRequest};

type Responder = Arc<dyn Fn(&JobRequest) -> Value + Send + Sync>;

/// Submissions remembered by [`OfflineClient::submitted`]; older ones are dropped.
pub const SUBMISSION_HISTORY: usize = 256;

/// A [`JobClient`] that never leaves the process.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use synde_gpu::client::{JobClient, OfflineClient, Submission};
/// use synde_gpu::{JobArgs, JobKind};
///
/// let client = OfflineClient::new();
/// let request = JobKind::CleanEc.request(JobArgs::clean_ec("MKT", None));
/// match client.submit(&request) {
///     Submission::Immediate(value) => assert_eq!(value["ec_number"], json!("3.2.1.17")),
///     Submission::Pending(_) => unreachable!(),
/// }
/// ```
#[derive(Default)]
pub struct OfflineClient {
    responders: DashMap<String, Responder>,
    submitted: Mutex<VecDeque<JobRequest>>,
}

impl std::fmt::Debug for OfflineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineClient")
            .field("overrides", &self.responders.len())
            .finish_non_exhaustive()
    }
}

impl OfflineClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answers `task_name` with `value`.
    pub fn with_response(self, task_name: impl Into<String>, value: Value) -> Self {
        self.with_responder(task_name, move |_| value.clone())
    }

    /// Answers `task_name` by calling `responder`.
    pub fn with_responder<F>(self, task_name: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&JobRequest) -> Value + Send + Sync + 'static,
    {
        self.responders.insert(task_name.into(), Arc::new(responder));
        self
    }

    /// The most recent [`SUBMISSION_HISTORY`] requests, oldest first.
    pub fn submitted(&self) -> Vec<JobRequest> {
        self.submitted.lock().iter().cloned().collect()
    }
}

impl JobClient for OfflineClient {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Offline
    }

    fn submit(&self, request: &JobRequest) -> Submission {
        {
            let mut submitted = self.submitted.lock();
            if submitted.len() == SUBMISSION_HISTORY {
                submitted.pop_front();
            }
            submitted.push_back(request.clone());
        }
        let value = match self.responders.get(&request.name) {
            Some(responder) => responder.value()(request),
            None => canned_response(request),
        };
        tracing::debug!(task = %request.name, "offline job answered in-process");
        Submission::Immediate(value)
    }
}

fn arg_str<'a>(request: &'a JobRequest, index: usize, default: &'a str) -> &'a str {
    request
        .args
        .positional
        .get(index)
        .and_then(Value::as_str)
        .unwrap_or(default)
}

/// Fixture payload for a known job kind; a generic success otherwise.
fn canned_response(request: &JobRequest) -> Value {
    let Some(kind) = JobKind::from_task_name(&request.name) else {
        return json!({"status": "success", "task": request.name});
    };
    match kind {
        JobKind::Esmfold => {
            let job_id = arg_str(request, 0, "mock");
            json!({
                "status": "success",
                "job_id": job_id,
                "pdb_path": format!("/mock/esmfold/{job_id}.pdb"),
                "pdb_data": "HEADER    MOCK STRUCTURE\nATOM      1  N   MET A   1      0.000   0.000   0.000\nEND\n",
                "avg_plddt": 85.5,
            })
        }
        JobKind::CleanEc => json!({
            "status": "success",
            "seq_name": request
                .args
                .keyword
                .get("seq_name")
                .and_then(Value::as_str)
                .unwrap_or("Input_Seq"),
            "ec_number": "3.2.1.17",
            "probability": 0.945,
        }),
        JobKind::DeepEnzyme => json!({
            "status": "success",
            "kcat": 125.7,
            "log_kcat": 2.1,
        }),
        JobKind::Temberture => json!({
            "status": "success",
            "melting_temperature": 62.5,
            "thermo_class": "mesophilic",
        }),
        JobKind::FlanExtractor => json!({
            "status": "success",
            "query": arg_str(request, 0, ""),
            "extracted": {},
        }),
        JobKind::Fpocket => json!({
            "status": "success",
            "output_dir": arg_str(request, 2, "synde_outputs/fpocket_results"),
            "pockets": [
                {"rank": 1, "score": 0.82, "volume": 512.3},
                {"rank": 2, "score": 0.61, "volume": 301.8},
            ],
        }),
    }
}
