//! Scripted job clients shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use synde_gpu::client::{DispatchMode, JobClient, JobHandle, Submission};
use synde_gpu::{JobError, JobRequest};

/// How a scripted job ends.
#[derive(Debug, Clone)]
pub enum Script {
    /// Ready and successful with this value.
    Succeed(Value),
    /// Ready and failed, with optional failure info.
    Fail(Option<String>),
    /// Ready and successful, but fetching the value raises.
    ValueRaises(String),
    /// Readiness probes raise.
    ProbeRaises(String),
    /// Never becomes ready.
    Hang,
}

/// What the coordinator did to a handle.
#[derive(Debug, Default)]
pub struct Probes {
    pub ready_checks: AtomicU32,
    pub cancels: AtomicU32,
    pub forced: AtomicBool,
}

impl Probes {
    pub fn ready_checks(&self) -> u32 {
        self.ready_checks.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> u32 {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn forced(&self) -> bool {
        self.forced.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ScriptedHandle {
    id: String,
    script: Script,
    ready_on_check: u32,
    probes: Arc<Probes>,
}

impl JobHandle for ScriptedHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_ready(&self) -> Result<bool, JobError> {
        let check = self.probes.ready_checks.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.script {
            Script::Hang => Ok(false),
            Script::ProbeRaises(message) => Err(JobError::Transport {
                message: message.clone(),
            }),
            _ => Ok(check >= self.ready_on_check),
        }
    }

    fn succeeded(&self) -> Result<bool, JobError> {
        Ok(matches!(
            self.script,
            Script::Succeed(_) | Script::ValueRaises(_)
        ))
    }

    fn value(&self) -> Result<Value, JobError> {
        match &self.script {
            Script::Succeed(value) => Ok(value.clone()),
            Script::ValueRaises(message) => Err(JobError::Remote {
                message: message.clone(),
            }),
            _ => Err(JobError::NoValue {
                handle_id: self.id.clone(),
            }),
        }
    }

    fn failure_info(&self) -> Result<Option<String>, JobError> {
        match &self.script {
            Script::Fail(info) => Ok(info.clone()),
            _ => Ok(None),
        }
    }

    fn cancel(&self, force: bool) -> Result<(), JobError> {
        self.probes.cancels.fetch_add(1, Ordering::SeqCst);
        self.probes.forced.store(force, Ordering::SeqCst);
        Ok(())
    }
}

/// A remote client whose every job follows one script.
pub struct ScriptedClient {
    script: Script,
    ready_on_check: u32,
    pub probes: Arc<Probes>,
    submitted: Mutex<Vec<JobRequest>>,
}

impl ScriptedClient {
    /// Jobs become ready on the `ready_on_check`-th readiness probe.
    pub fn new(script: Script, ready_on_check: u32) -> Arc<Self> {
        Arc::new(Self {
            script,
            ready_on_check,
            probes: Arc::new(Probes::default()),
            submitted: Mutex::new(Vec::new()),
        })
    }

    pub fn submitted(&self) -> Vec<JobRequest> {
        self.submitted.lock().unwrap().clone()
    }
}

impl JobClient for ScriptedClient {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Remote
    }

    fn submit(&self, request: &JobRequest) -> Submission {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(request.clone());
        Submission::Pending(Box::new(ScriptedHandle {
            id: format!("task-{}", submitted.len()),
            script: self.script.clone(),
            ready_on_check: self.ready_on_check,
            probes: self.probes.clone(),
        }))
    }
}
