//! Guarded job-state store on top of a [`StorageBackend`].
//!
//! [`JobStateStore`] keeps one [`JobStateRecord`] per job id as canonical
//! JSON under `job_state:<job_id>`. Every mutation runs inside the
//! [`JobStateGuard`] for that job id and commits with
//! [`StorageBackend::put_if_version`], so two coordinators finishing at the
//! same time can never drop each other's update.
//!
//! # CAS Semantics
//!
//! A version mismatch on commit means a writer bypassed the guard (or the
//! guard expired mid-update). It surfaces as [`StateError::Storage`]
//! wrapping [`StorageError::VersionConflict`]; the update is not retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::GpuConfig;
use crate::constants::JOB_STATE_NAMESPACE;
use crate::domain::{GpuTaskEntry, JobStateRecord};
use crate::error::StateError;
use crate::lock::{JobStateGuard, LockStore};
use crate::store::backend::{make_key, make_prefix, parse_key, StorageBackend, StorageError};
use crate::types::ExecutionResult;

/// Job-state store that delegates persistence to a [`StorageBackend`].
///
/// # Type Parameters
///
/// * `B` - A [`StorageBackend`] implementation (in-memory, Redis)
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use synde_gpu::store::memory::InMemoryBackend;
/// use synde_gpu::{ExecutionResult, InMemoryLockStore, JobStateGuard, JobStateStore};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let guard = JobStateGuard::new(Arc::new(InMemoryLockStore::new()));
/// let store = JobStateStore::new(InMemoryBackend::new(), guard);
///
/// store.record_submitted("job-1", "h-1", "esmfold").await.unwrap();
/// let done = ExecutionResult::success(json!({"pdb_path": "/x.pdb"}), Some("h-1".into()), 4.2);
/// store.record_result("job-1", "esmfold", &done).await.unwrap();
///
/// assert!(store.active_tasks("job-1").await.unwrap().is_empty());
/// # }
/// ```
#[derive(Debug)]
pub struct JobStateStore<B: StorageBackend> {
    backend: B,
    guard: JobStateGuard,
    lock_timeout: Duration,
}

impl<B: StorageBackend> JobStateStore<B> {
    /// Creates a store whose updates hold `guard` for its configured expiry.
    pub fn new(backend: B, guard: JobStateGuard) -> Self {
        let lock_timeout = guard.options().timeout;
        Self {
            backend,
            guard,
            lock_timeout,
        }
    }

    /// A store guarded by locks in `lock_store`, with the expiry and retry
    /// policy from `config`.
    pub fn from_config(backend: B, lock_store: Arc<dyn LockStore>, config: &GpuConfig) -> Self {
        Self::new(backend, JobStateGuard::from_config(lock_store, config))
    }

    /// Sets how long the job-state guard survives without release.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn guard(&self) -> &JobStateGuard {
        &self.guard
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    // ---- Serialization helpers (private) ----

    fn key(job_id: &str) -> String {
        make_key(JOB_STATE_NAMESPACE, job_id)
    }

    fn serialize_record(record: &JobStateRecord) -> Result<Vec<u8>, StateError> {
        Ok(serde_json::to_vec(record)?)
    }

    fn deserialize_record(data: &[u8], version: u64) -> Result<JobStateRecord, StateError> {
        let mut record: JobStateRecord = serde_json::from_slice(data)?;
        record.version = version;
        Ok(record)
    }

    async fn load(&self, job_id: &str) -> Result<JobStateRecord, StateError> {
        match self.backend.get(&Self::key(job_id)).await {
            Ok(stored) => Self::deserialize_record(&stored.data, stored.version),
            Err(StorageError::NotFound { .. }) => Ok(JobStateRecord::new(job_id)),
            Err(e) => Err(e.into()),
        }
    }

    // ---- Domain operations (public) ----

    /// Reads the record for `job_id`.
    ///
    /// A job with no stored record yields an empty record with version 0.
    /// The read is not guarded; use [`update`](Self::update) to act on it.
    pub async fn get(&self, job_id: &str) -> Result<JobStateRecord, StateError> {
        self.load(job_id).await
    }

    /// Runs a guarded read-modify-write on the record for `job_id`.
    ///
    /// `mutate` sees the freshest stored record. The result is stamped with
    /// the current time and committed against the version that was read.
    ///
    /// # Errors
    ///
    /// - [`StateError::Lock`] if the guard cannot be taken; `mutate` is not run.
    /// - [`StateError::Storage`] on backend failure or a version conflict.
    /// - [`StateError::Serialization`] if the stored record is corrupt.
    pub async fn update<F, R>(&self, job_id: &str, mutate: F) -> Result<R, StateError>
    where
        F: FnOnce(&mut JobStateRecord) -> R + Send,
        R: Send,
    {
        self.guard
            .with_job(job_id, self.lock_timeout, || async move {
                let mut record = self.load(job_id).await?;
                let outcome = mutate(&mut record);
                record.updated_at = Utc::now();
                let bytes = Self::serialize_record(&record)?;
                self.backend
                    .put_if_version(&Self::key(job_id), &bytes, record.version)
                    .await?;
                Ok::<_, StateError>(outcome)
            })
            .await?
    }

    /// Records that `handle_id` was submitted for `task`.
    pub async fn record_submitted(
        &self,
        job_id: &str,
        handle_id: &str,
        task: &str,
    ) -> Result<(), StateError> {
        tracing::debug!(job_id, handle_id, task, "recording submission");
        self.update(job_id, |record| record.add_submission(handle_id, task))
            .await
    }

    /// Records a coordinator result for `task`.
    ///
    /// Returns `false` when the matching entry rejected the transition (it
    /// had already reached a terminal status).
    pub async fn record_result(
        &self,
        job_id: &str,
        task: &str,
        result: &ExecutionResult,
    ) -> Result<bool, StateError> {
        let applied = self
            .update(job_id, |record| record.add_result(task, result))
            .await?;
        if !applied {
            tracing::warn!(
                job_id,
                task,
                handle_id = result.handle_id().unwrap_or("-"),
                status = %result.status(),
                "job-state entry rejected result"
            );
        }
        Ok(applied)
    }

    /// Entries for `job_id` that have not reached a terminal status.
    pub async fn active_tasks(&self, job_id: &str) -> Result<Vec<GpuTaskEntry>, StateError> {
        let record = self.load(job_id).await?;
        Ok(record.active().cloned().collect())
    }

    /// Deletes the record for `job_id`. Returns `false` if none existed.
    pub async fn remove(&self, job_id: &str) -> Result<bool, StateError> {
        self.guard
            .with_job(job_id, self.lock_timeout, || async move {
                Ok::<_, StateError>(self.backend.delete(&Self::key(job_id)).await?)
            })
            .await?
    }

    /// Ids of every job with a stored record.
    pub async fn job_ids(&self) -> Result<Vec<String>, StateError> {
        let records = self
            .backend
            .list_by_prefix(&make_prefix(JOB_STATE_NAMESPACE))
            .await?;
        Ok(records
            .iter()
            .filter_map(|(key, _)| parse_key(key).map(|(_, id)| id.to_string()))
            .collect())
    }
}
