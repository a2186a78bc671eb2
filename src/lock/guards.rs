//! Lock specializations with fixed prefixes.
//!
//! [`JobStateGuard`] serializes read-modify-write cycles on one job's
//! shared state record. [`GpuLaneLock`] marks an accelerator-bound task
//! kind as busy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{DistributedLock, LockGuard, LockOptions, LockStore};
use crate::config::GpuConfig;
use crate::constants::{GPU_LOCK_PREFIX, STATE_LOCK_PREFIX};
use crate::error::LockError;
use crate::types::JobKind;

/// Guard for updates to one job's shared state record.
///
/// Any code that reads and then writes the job-state record for a job id
/// must run inside [`for_job`](Self::for_job) or
/// [`with_job`](Self::with_job) for that id. Locks live under
/// `synde:state_lock:<job_id>`.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use synde_gpu::{InMemoryLockStore, JobStateGuard};
///
/// # #[tokio::main]
/// # async fn main() {
/// let guard = JobStateGuard::new(Arc::new(InMemoryLockStore::new()));
/// let held = guard.for_job("job-42", Duration::from_secs(30)).await.unwrap();
/// assert!(guard.is_held("job-42").await);
/// held.release().await;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct JobStateGuard {
    lock: DistributedLock,
    options: LockOptions,
}

impl JobStateGuard {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            lock: DistributedLock::new(store).with_prefix(STATE_LOCK_PREFIX),
            options: LockOptions::default(),
        }
    }

    /// A guard using the configured lock expiry and retry policy.
    pub fn from_config(store: Arc<dyn LockStore>, config: &GpuConfig) -> Self {
        Self::new(store).with_options(config.lock_options())
    }

    /// Sets retry behaviour for every acquisition; the expiry passed to
    /// [`for_job`](Self::for_job) still wins.
    pub fn with_options(mut self, options: LockOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Acquires the guard for `job_id`, expiring after `timeout`.
    ///
    /// # Errors
    ///
    /// [`LockError::NotAcquired`] on exhausted retries, [`LockError::Store`]
    /// on store failure.
    pub async fn for_job(&self, job_id: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        let options = self.options.clone().with_timeout(timeout);
        self.lock.guard(job_id, &options).await
    }

    /// Runs `critical` while holding the guard for `job_id`.
    pub async fn with_job<F, Fut, T>(
        &self,
        job_id: &str,
        timeout: Duration,
        critical: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let options = self.options.clone().with_timeout(timeout);
        self.lock.locked(job_id, &options, critical).await
    }

    pub async fn is_held(&self, job_id: &str) -> bool {
        self.lock.is_locked(job_id).await
    }
}

/// Busy marker for accelerator-bound task kinds.
///
/// Locks live under `synde:gpu:task:<name>` and default to a 30 minute
/// expiry so a crashed worker frees the lane eventually.
#[derive(Debug, Clone)]
pub struct GpuLaneLock {
    lock: DistributedLock,
    options: LockOptions,
}

impl GpuLaneLock {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1800);

    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            lock: DistributedLock::new(store).with_prefix(GPU_LOCK_PREFIX),
            options: LockOptions::default().with_timeout(Self::DEFAULT_TIMEOUT),
        }
    }

    /// Retry policy from `config`. Lane locks keep the 30 minute expiry,
    /// since a job routinely outlives the job-state lock timeout.
    pub fn from_config(store: Arc<dyn LockStore>, config: &GpuConfig) -> Self {
        Self::new(store).with_options(config.lock_options().with_timeout(Self::DEFAULT_TIMEOUT))
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    pub fn with_options(mut self, options: LockOptions) -> Self {
        self.options = options;
        self
    }

    fn lock_name(task: &str) -> String {
        format!("task:{task}")
    }

    /// Marks `task` busy until the guard is released or `timeout` passes.
    ///
    /// # Errors
    ///
    /// [`LockError::NotAcquired`] if the task is already busy after retries.
    pub async fn for_task(&self, task: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        let options = self.options.clone().with_timeout(timeout);
        self.lock.guard(&Self::lock_name(task), &options).await
    }

    /// [`for_task`](Self::for_task) keyed by job kind, with the default expiry.
    pub async fn for_kind(&self, kind: JobKind) -> Result<LockGuard, LockError> {
        self.for_task(kind.lock_name(), self.options.timeout).await
    }

    pub async fn is_task_busy(&self, task: &str) -> bool {
        self.lock.is_locked(&Self::lock_name(task)).await
    }

    /// Returns `true` if any accelerator-bound task kind is busy.
    pub async fn is_gpu_busy(&self) -> bool {
        for kind in JobKind::ACCELERATOR_BOUND {
            if self.is_task_busy(kind.lock_name()).await {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::InMemoryLockStore;

    #[tokio::test]
    async fn job_guards_are_independent_per_job() {
        let guard = JobStateGuard::new(Arc::new(InMemoryLockStore::new()))
            .with_options(LockOptions::default().non_blocking());
        let a = guard.for_job("job-a", Duration::from_secs(5)).await.unwrap();
        let b = guard.for_job("job-b", Duration::from_secs(5)).await.unwrap();
        assert!(guard.for_job("job-a", Duration::from_secs(5)).await.is_err());
        a.release().await;
        b.release().await;
        assert!(!guard.is_held("job-a").await);
    }

    #[tokio::test]
    async fn job_guard_uses_state_lock_prefix() {
        let store = Arc::new(InMemoryLockStore::new());
        let guard = JobStateGuard::new(store.clone());
        let held = guard.for_job("job-7", Duration::from_secs(5)).await.unwrap();
        assert_eq!(held.token().unwrap().key(), "synde:state_lock:job-7");
        held.release().await;
    }

    #[tokio::test]
    async fn gpu_busy_tracks_accelerator_bound_kinds() {
        let lane = GpuLaneLock::new(Arc::new(InMemoryLockStore::new()));
        assert!(!lane.is_gpu_busy().await);

        let fpocket = lane.for_kind(JobKind::Fpocket).await.unwrap();
        assert!(!lane.is_gpu_busy().await);
        fpocket.release().await;

        let esmfold = lane.for_kind(JobKind::Esmfold).await.unwrap();
        assert_eq!(esmfold.token().unwrap().key(), "synde:gpu:task:esmfold");
        assert!(lane.is_gpu_busy().await);
        esmfold.release().await;
        assert!(!lane.is_gpu_busy().await);
    }

    #[tokio::test]
    async fn gpu_task_lock_contends_per_task() {
        let lane = GpuLaneLock::new(Arc::new(InMemoryLockStore::new()))
            .with_options(LockOptions::default().non_blocking());
        let held = lane.for_task("clean_ec", Duration::from_secs(5)).await.unwrap();
        let err = lane
            .for_task("clean_ec", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::NotAcquired { .. }));
        held.release().await;
    }
}
