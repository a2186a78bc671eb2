//! Pre-submission checkpoints and progress callbacks.
//!
//! A [`CheckpointSink`] persists an opaque state snapshot tagged with
//! [`CheckpointMetadata`]. The coordinator writes one immediately before
//! submitting a job, so recovery tooling that finds the snapshot knows the
//! job may be running remotely. The coordinator never reads checkpoints
//! back.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CheckpointError;

/// Tags attached to every checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Pipeline stage, `pre_submit` for coordinator checkpoints.
    pub stage: String,
    /// Job kind label the checkpoint was written for.
    pub task: String,
    pub timestamp: DateTime<Utc>,
}

impl CheckpointMetadata {
    /// Metadata stamped with the current time.
    pub fn new(stage: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            task: task.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A stored snapshot as returned by [`MemoryCheckpointSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    pub id: String,
    pub state: Value,
    pub metadata: CheckpointMetadata,
}

/// Where pre-submission checkpoints go.
///
/// Errors are reported to the coordinator, which logs and discards them;
/// a failing sink never stops a submission.
pub trait CheckpointSink: Send + Sync {
    /// Persists `state` with `metadata` and returns the checkpoint id.
    fn put(&self, state: &Value, metadata: &CheckpointMetadata) -> Result<String, CheckpointError>;
}

/// Phase reported to a [`ProgressCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    /// The job has been submitted and is not ready yet.
    Started,
}

impl ProgressPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
        }
    }
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Called while a job is polled: `(handle_id, phase, elapsed_seconds)`.
///
/// Invoked at most once per checkpoint interval.
pub type ProgressCallback = Arc<dyn Fn(&str, ProgressPhase, f64) + Send + Sync>;

/// In-process [`CheckpointSink`].
///
/// Ids are `checkpoint-1`, `checkpoint-2`, ... in write order.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use synde_gpu::{CheckpointMetadata, CheckpointSink, MemoryCheckpointSink};
///
/// let sink = MemoryCheckpointSink::new();
/// let id = sink
///     .put(&json!({"sequence": "MKT"}), &CheckpointMetadata::new("pre_submit", "ESMFold"))
///     .unwrap();
/// assert_eq!(id, "checkpoint-1");
/// assert_eq!(sink.list(Some("pre_submit")).len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryCheckpointSink {
    next_id: AtomicU64,
    snapshots: RwLock<BTreeMap<u64, CheckpointSnapshot>>,
}

impl MemoryCheckpointSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots newest first, optionally restricted to one stage.
    pub fn list(&self, stage: Option<&str>) -> Vec<CheckpointSnapshot> {
        self.snapshots
            .read()
            .values()
            .rev()
            .filter(|snapshot| stage.is_none_or(|s| snapshot.metadata.stage == s))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<CheckpointSnapshot> {
        let seq = Self::parse_id(id)?;
        self.snapshots.read().get(&seq).cloned()
    }

    pub fn latest(&self) -> Option<CheckpointSnapshot> {
        self.snapshots.read().values().next_back().cloned()
    }

    /// Returns `false` if no such checkpoint exists.
    pub fn delete(&self, id: &str) -> bool {
        Self::parse_id(id).is_some_and(|seq| self.snapshots.write().remove(&seq).is_some())
    }

    pub fn clear(&self) {
        self.snapshots.write().clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }

    fn parse_id(id: &str) -> Option<u64> {
        id.strip_prefix("checkpoint-")?.parse().ok()
    }
}

impl CheckpointSink for MemoryCheckpointSink {
    fn put(&self, state: &Value, metadata: &CheckpointMetadata) -> Result<String, CheckpointError> {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("checkpoint-{seq}");
        self.snapshots.write().insert(
            seq,
            CheckpointSnapshot {
                id: id.clone(),
                state: state.clone(),
                metadata: metadata.clone(),
            },
        );
        Ok(id)
    }
}
