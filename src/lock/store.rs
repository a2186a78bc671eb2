//! The lock store boundary.
//!
//! A [`LockStore`] is a shared key-value store with three atomic
//! primitives. Expiry is enforced by the store, never by the client, so a
//! crashed holder cannot wedge a lock forever.

use std::time::Duration;

use async_trait::async_trait;

use crate::store::backend::StorageError;

/// Atomic primitives a distributed lock is built on.
///
/// Keys arrive fully qualified (`<prefix>:<lock_name>`); owners are opaque
/// tokens unique per acquisition.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Stores `owner` under `key` with the given expiry, only if `key` is
    /// absent or expired. Returns `true` if the value was stored.
    async fn set_if_absent(&self, key: &str, owner: &str, ttl: Duration)
        -> Result<bool, StorageError>;

    /// Deletes `key` only if it currently holds `owner` and has not
    /// expired. Returns `true` if a live lock was deleted.
    async fn delete_if_owner(&self, key: &str, owner: &str) -> Result<bool, StorageError>;

    /// Returns `true` if `key` holds a live (unexpired) value.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}
