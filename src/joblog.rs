//! Per-job progress log.
//!
//! A [`JobLog`] is bound to one job id at construction and writes only to
//! that job's stream. There is no ambient "current job": fanning out
//! across jobs on one worker cannot leak lines between them.
//!
//! Readers fetch incrementally with [`JobLog::logs`], passing back the
//! index returned by the previous call.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::checkpoint::{ProgressCallback, ProgressPhase};

/// One reported line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    #[serde(rename = "msg")]
    pub message: String,
}

/// Storage for job log streams.
///
/// Indices are absolute per job: entries evicted from a bounded sink still
/// count, so an index handed out earlier stays valid.
pub trait LogSink: Send + Sync {
    fn append(&self, job_id: &str, entry: LogEntry);

    /// Entries at index `since` and later, plus the index to resume from.
    fn entries(&self, job_id: &str, since: usize) -> (Vec<LogEntry>, usize);

    fn clear(&self, job_id: &str);
}

#[derive(Debug, Default)]
struct Stream {
    evicted: usize,
    entries: VecDeque<LogEntry>,
}

/// In-process [`LogSink`] keeping at most `capacity` entries per job.
#[derive(Debug)]
pub struct MemoryLogSink {
    capacity: usize,
    streams: DashMap<String, Stream>,
}

impl MemoryLogSink {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            streams: DashMap::new(),
        }
    }
}

impl Default for MemoryLogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, job_id: &str, entry: LogEntry) {
        let mut stream = self.streams.entry(job_id.to_string()).or_default();
        stream.entries.push_back(entry);
        while stream.entries.len() > self.capacity {
            stream.entries.pop_front();
            stream.evicted += 1;
        }
    }

    fn entries(&self, job_id: &str, since: usize) -> (Vec<LogEntry>, usize) {
        let Some(stream) = self.streams.get(job_id) else {
            return (Vec::new(), since);
        };
        let skip = since.saturating_sub(stream.evicted);
        let entries: Vec<LogEntry> = stream.entries.iter().skip(skip).cloned().collect();
        let next = stream.evicted + stream.entries.len();
        (entries, next.max(since))
    }

    fn clear(&self, job_id: &str) {
        self.streams.remove(job_id);
    }
}

/// Log handle for one job.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use synde_gpu::{JobLog, MemoryLogSink};
///
/// let log = JobLog::new("job-42", Arc::new(MemoryLogSink::new()));
/// log.node_start("structure", "ESMFold");
/// let (entries, next) = log.logs(0);
/// assert_eq!(entries[0].message, "Starting: structure - ESMFold");
/// assert_eq!(next, 1);
/// ```
#[derive(Clone)]
pub struct JobLog {
    job_id: String,
    sink: Arc<dyn LogSink>,
}

impl std::fmt::Debug for JobLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLog")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

impl JobLog {
    pub fn new(job_id: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            job_id: job_id.into(),
            sink,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Appends a line to this job's stream.
    pub fn report(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(job_id = %self.job_id, "{message}");
        self.sink.append(
            &self.job_id,
            LogEntry {
                ts: Utc::now(),
                message,
            },
        );
    }

    pub fn logs(&self, since: usize) -> (Vec<LogEntry>, usize) {
        self.sink.entries(&self.job_id, since)
    }

    pub fn clear(&self) {
        self.sink.clear(&self.job_id);
    }

    pub fn node_start(&self, node: &str, details: &str) {
        self.report(with_details(format!("Starting: {node}"), details));
    }

    pub fn node_complete(&self, node: &str, details: &str) {
        self.report(with_details(format!("Completed: {node}"), details));
    }

    pub fn node_error(&self, node: &str, error: &str) {
        self.report(format!("Error in {node}: {error}"));
    }

    pub fn gpu_task(&self, task: &str, status: &str) {
        self.report(format!("GPU Task [{task}]: {status}"));
    }

    pub fn info(&self, message: &str) {
        self.report(format!("Info: {message}"));
    }

    pub fn warning(&self, message: &str) {
        self.report(format!("Warning: {message}"));
    }

    /// Adapts this log into a coordinator progress callback.
    ///
    /// Each invocation writes a GPU task line such as
    /// `GPU Task [ESMFold]: started (35s, handle h-1)`.
    pub fn progress_callback(&self, label: impl Into<String>) -> ProgressCallback {
        let log = self.clone();
        let label = label.into();
        Arc::new(move |handle_id: &str, phase: ProgressPhase, elapsed: f64| {
            log.gpu_task(&label, &format!("{phase} ({elapsed:.0}s, handle {handle_id})"));
        })
    }
}

fn with_details(mut message: String, details: &str) -> String {
    if !details.is_empty() {
        message.push_str(" - ");
        message.push_str(details);
    }
    message
}
