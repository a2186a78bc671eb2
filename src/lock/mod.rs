//! Distributed mutual-exclusion lock.
//!
//! A named, expiring lock backed by a shared [`LockStore`]:
//!
//! ```text
//! Unlocked -> (acquire) -> Locked(owner, expiry) -> (release | expiry) -> Unlocked
//! ```
//!
//! [`DistributedLock::acquire`] returns `Ok(None)` on contention, so
//! callers can branch without treating contention as an error. The scoped
//! helpers ([`DistributedLock::guard`] and [`DistributedLock::locked`])
//! fail with [`LockError::NotAcquired`] instead, so a critical section
//! never runs unlocked.
//!
//! The lock is not reentrant: acquiring a name you already hold simply
//! contends with yourself.

pub mod guards;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod store;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use uuid::Uuid;

use crate::constants::LOCK_PREFIX;
use crate::error::LockError;

pub use guards::{GpuLaneLock, JobStateGuard};
pub use memory::InMemoryLockStore;
pub use store::LockStore;

/// How an acquisition behaves.
///
/// Defaults: 30 s expiry, blocking, 0.5 s between attempts, 10 retries.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use synde_gpu::LockOptions;
///
/// let options = LockOptions::default()
///     .with_timeout(Duration::from_secs(5))
///     .with_retries(3, Duration::from_millis(50));
/// assert!(options.blocking);
/// assert_eq!(options.max_attempts(), 4);
/// assert_eq!(LockOptions::default().non_blocking().max_attempts(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LockOptions {
    /// How long a held lock survives without an explicit release.
    pub timeout: Duration,
    /// Retry on contention instead of returning immediately.
    pub blocking: bool,
    /// Pause between attempts when blocking.
    pub retry_interval: Duration,
    /// Retries after the first attempt when blocking.
    pub max_retries: u32,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            blocking: true,
            retry_interval: Duration::from_millis(500),
            max_retries: 10,
        }
    }
}

impl LockOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_interval: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_interval = retry_interval;
        self
    }

    /// A single attempt; contention returns immediately.
    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    /// Total attempts an acquisition makes before giving up.
    pub fn max_attempts(&self) -> u32 {
        if self.blocking {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }
}

/// A held lock.
///
/// Created by [`DistributedLock::acquire`]; released by
/// [`DistributedLock::release`] or passively by store-side expiry. Release
/// is idempotent: only the first call reaches the store.
#[derive(Debug)]
pub struct LockToken {
    name: String,
    key: String,
    owner: String,
    acquired_at: Instant,
    released: AtomicBool,
}

impl LockToken {
    /// Lock name without prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified store key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Owner token stored under the key.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

/// Named locks under one key prefix.
///
/// Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    prefix: String,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl DistributedLock {
    /// Creates a lock family with the default prefix `synde:lock`.
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            prefix: LOCK_PREFIX.to_string(),
        }
    }

    /// Sets the key prefix (builder pattern).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Store key for a lock name: `<prefix>:<name>`.
    pub fn key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    /// Tries to acquire `name`.
    ///
    /// Returns `Ok(None)` when the lock is held elsewhere and attempts are
    /// exhausted (one attempt when non-blocking, `1 + max_retries` when
    /// blocking). Waits between attempts with a timer, never a busy loop.
    ///
    /// # Errors
    ///
    /// [`LockError::Store`] if the lock store fails. Contention is never an
    /// error here.
    pub async fn acquire(
        &self,
        name: &str,
        options: &LockOptions,
    ) -> Result<Option<LockToken>, LockError> {
        let key = self.key(name);
        let owner = Uuid::new_v4().to_string();
        let attempts = options.max_attempts();

        for attempt in 1..=attempts {
            if self
                .store
                .set_if_absent(&key, &owner, options.timeout)
                .await?
            {
                tracing::debug!(lock = %key, attempt, "lock acquired");
                return Ok(Some(LockToken {
                    name: name.to_string(),
                    key,
                    owner,
                    acquired_at: Instant::now(),
                    released: AtomicBool::new(false),
                }));
            }
            if attempt < attempts {
                tokio::time::sleep(options.retry_interval).await;
            }
        }

        tracing::debug!(lock = %key, attempts, "lock contended, giving up");
        Ok(None)
    }

    /// Releases a held lock.
    ///
    /// Returns `true` only if this call removed a live lock owned by the
    /// token. A second release, a release after expiry, and a store error
    /// all return `false`; none of them panic or fail.
    pub async fn release(&self, token: &LockToken) -> bool {
        if token.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.store.delete_if_owner(&token.key, &token.owner).await {
            Ok(released) => {
                if !released {
                    tracing::debug!(lock = %token.key, "lock had already expired at release");
                }
                released
            }
            Err(e) => {
                tracing::warn!(lock = %token.key, error = %e, "lock release failed; relying on expiry");
                false
            }
        }
    }

    /// Best-effort check whether `name` is currently held.
    ///
    /// The answer may be stale by the time the caller acts on it. Store
    /// errors are logged and reported as "not locked".
    pub async fn is_locked(&self, name: &str) -> bool {
        let key = self.key(name);
        match self.store.exists(&key).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!(lock = %key, error = %e, "lock liveness check failed");
                false
            }
        }
    }

    /// Acquires `name` and returns a guard that releases it.
    ///
    /// # Errors
    ///
    /// - [`LockError::NotAcquired`] if attempts are exhausted.
    /// - [`LockError::Store`] if the lock store fails.
    pub async fn guard(&self, name: &str, options: &LockOptions) -> Result<LockGuard, LockError> {
        match self.acquire(name, options).await? {
            Some(token) => Ok(LockGuard {
                lock: self.clone(),
                token: Some(token),
            }),
            None => Err(LockError::NotAcquired {
                name: name.to_string(),
                attempts: options.max_attempts(),
            }),
        }
    }

    /// Runs `critical` while holding `name`.
    ///
    /// The lock is released when `critical` returns or panics (the panic is
    /// resumed after release). If the returned future is dropped mid-way,
    /// the guard schedules the release on the current runtime.
    ///
    /// # Errors
    ///
    /// Same as [`guard`](Self::guard); `critical` is not run on error.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use synde_gpu::{DistributedLock, InMemoryLockStore, LockOptions};
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let lock = DistributedLock::new(Arc::new(InMemoryLockStore::new()));
    /// let answer = lock
    ///     .locked("job-42", &LockOptions::default(), || async { 42 })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(answer, 42);
    /// assert!(!lock.is_locked("job-42").await);
    /// # }
    /// ```
    pub async fn locked<F, Fut, T>(
        &self,
        name: &str,
        options: &LockOptions,
        critical: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.guard(name, options).await?;
        let outcome = AssertUnwindSafe(critical()).catch_unwind().await;
        guard.release().await;
        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Scoped ownership of a lock.
///
/// Call [`release`](Self::release) to release deterministically. Dropping
/// an unreleased guard spawns the release on the current Tokio runtime;
/// outside a runtime the store-side expiry reclaims the lock.
#[derive(Debug)]
pub struct LockGuard {
    lock: DistributedLock,
    token: Option<LockToken>,
}

impl LockGuard {
    pub fn token(&self) -> Option<&LockToken> {
        self.token.as_ref()
    }

    /// Releases the lock, returning whether a live lock was removed.
    pub async fn release(mut self) -> bool {
        match self.token.take() {
            Some(token) => self.lock.release(&token).await,
            None => false,
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        if token.is_released() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let lock = self.lock.clone();
                handle.spawn(async move {
                    lock.release(&token).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    lock = %token.key,
                    "lock guard dropped outside a runtime; lock expires on its own"
                );
            }
        }
    }
}
