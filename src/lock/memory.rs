//! In-process lock store.
//!
//! [`InMemoryLockStore`] keeps `key -> (owner, expiry)` in a [`DashMap`].
//! The entry API makes set-if-absent atomic per key. Expired entries are
//! replaced on the next acquisition and ignored by every other operation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::store::LockStore;
use crate::store::backend::StorageError;

/// Expiry used when `now + ttl` does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[derive(Debug, Clone)]
struct HeldLock {
    owner: String,
    expires_at: Instant,
}

impl HeldLock {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Single-process [`LockStore`] for tests and one-host deployments.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use synde_gpu::{DistributedLock, InMemoryLockStore};
///
/// let lock = DistributedLock::new(Arc::new(InMemoryLockStore::new()));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    entries: DashMap<String, HeldLock>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live locks.
    pub fn live_count(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.value().is_live(now)).count()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let now = Instant::now();
        let held = HeldLock {
            owner: owner.to_string(),
            expires_at: expiry(now, ttl),
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_live(now) {
                    return Ok(false);
                }
                entry.insert(held);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(held);
                Ok(true)
            }
        }
    }

    async fn delete_if_owner(&self, key: &str, owner: &str) -> Result<bool, StorageError> {
        let now = Instant::now();
        let removed = self.entries.remove_if(key, |_, held| held.owner == owner);
        Ok(removed.is_some_and(|(_, held)| held.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .is_some_and(|held| held.value().is_live(now)))
    }
}
