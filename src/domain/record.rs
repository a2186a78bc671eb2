//! Job-state record -- the store's representation of one workflow's GPU jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ExecutionResult, ExecutionStatus};

/// One dispatched GPU job inside a [`JobStateRecord`].
///
/// # Examples
///
/// ```
/// use synde_gpu::{ExecutionStatus, GpuTaskEntry};
///
/// let entry = GpuTaskEntry::submitted("handle-1", "ESMFold");
/// assert_eq!(entry.status, ExecutionStatus::Pending);
/// assert!(entry.completed_at.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuTaskEntry {
    /// Handle id returned by the job client.
    pub handle_id: String,

    /// Label of the job kind (`ESMFold`, `CLEAN_EC`, ...).
    pub task_name: String,

    pub status: ExecutionStatus,

    pub submitted_at: DateTime<Utc>,

    /// Set when the entry reaches a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GpuTaskEntry {
    /// A freshly submitted entry in the `Pending` state.
    pub fn submitted(handle_id: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            handle_id: handle_id.into(),
            task_name: task_name.into(),
            status: ExecutionStatus::Pending,
            submitted_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Applies a coordinator result to this entry.
    ///
    /// Returns `false` without modifying the entry when the transition is
    /// not allowed (the entry is already terminal, for example).
    pub fn apply(&mut self, result: &ExecutionResult) -> bool {
        let next = result.status();
        if !self.status.can_transition_to(&next) {
            return false;
        }
        self.status = next;
        self.result = result.payload().cloned();
        self.error = result.error().map(str::to_string);
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        true
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Every GPU job dispatched for one workflow instance.
///
/// The `version` field mirrors the storage version and is not serialized;
/// [`JobStateStore`](crate::store::job_state::JobStateStore) sets it on
/// every read and write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStateRecord {
    pub job_id: String,

    /// Entries in submission order.
    #[serde(default)]
    pub tasks: Vec<GpuTaskEntry>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip)]
    pub version: u64,
}

impl JobStateRecord {
    /// An empty record for `job_id`, not yet stored (version 0).
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            tasks: Vec::new(),
            updated_at: Utc::now(),
            version: 0,
        }
    }

    pub fn entry(&self, handle_id: &str) -> Option<&GpuTaskEntry> {
        self.tasks.iter().find(|entry| entry.handle_id == handle_id)
    }

    pub fn entry_mut(&mut self, handle_id: &str) -> Option<&mut GpuTaskEntry> {
        self.tasks.iter_mut().find(|entry| entry.handle_id == handle_id)
    }

    /// Records a submission. An existing entry with the same handle id is
    /// left untouched.
    pub fn add_submission(&mut self, handle_id: &str, task_name: &str) {
        if self.entry(handle_id).is_none() {
            self.tasks.push(GpuTaskEntry::submitted(handle_id, task_name));
        }
    }

    /// Records a coordinator result.
    ///
    /// Updates the entry matching the result's handle id, or appends a new
    /// one when there is none (offline results carry no handle id and always
    /// append). Returns `false` if an existing entry rejected the transition.
    pub fn add_result(&mut self, task_name: &str, result: &ExecutionResult) -> bool {
        if let Some(handle_id) = result.handle_id() {
            if let Some(entry) = self.entry_mut(handle_id) {
                return entry.apply(result);
            }
        }
        let handle_id = result
            .handle_id()
            .map(str::to_string)
            .unwrap_or_else(|| format!("inline-{}", uuid::Uuid::new_v4()));
        let mut entry = GpuTaskEntry::submitted(handle_id, task_name);
        if !entry.apply(result) {
            return false;
        }
        self.tasks.push(entry);
        true
    }

    /// Entries that have not reached a terminal status.
    pub fn active(&self) -> impl Iterator<Item = &GpuTaskEntry> {
        self.tasks.iter().filter(|entry| entry.is_active())
    }
}
