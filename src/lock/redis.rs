//! Redis lock store.
//!
//! Acquisition is `SET key owner NX PX ttl`; release is a Lua script that
//! deletes the key only while it still holds the caller's owner token.
//! Redis enforces expiry server-side.

use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;

use super::store::LockStore;
use crate::store::backend::StorageError;
use crate::store::redis::{connect, map_redis_error};

/// Compare-and-delete.
///
/// KEYS[1] = lock key, ARGV[1] = owner token. Returns 1 if deleted.
const LUA_DELETE_IF_OWNER: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// [`LockStore`] backed by Redis.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use synde_gpu::lock::redis::RedisLockStore;
/// use synde_gpu::DistributedLock;
///
/// # async fn example() {
/// let store = RedisLockStore::new("redis://127.0.0.1:6379").await.unwrap();
/// let lock = DistributedLock::new(Arc::new(store));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RedisLockStore {
    conn: MultiplexedConnection,
}

impl RedisLockStore {
    /// Connects to Redis at the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if the connection cannot be established.
    pub async fn new(url: &str) -> Result<Self, StorageError> {
        Ok(Self::with_connection(connect(url).await?))
    }

    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        // PX rejects 0; a zero TTL still has to expire.
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, key))?;
        Ok(reply.is_some())
    }

    async fn delete_if_owner(&self, key: &str, owner: &str) -> Result<bool, StorageError> {
        let deleted: i64 = Script::new(LUA_DELETE_IF_OWNER)
            .key(key)
            .arg(owner)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, key))?;
        Ok(deleted == 1)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        conn.exists(key)
            .await
            .map_err(|e| map_redis_error(e, key))
    }
}

#[cfg(all(test, feature = "redis-tests"))]
mod integration_tests {
    use super::*;

    async fn test_store() -> (RedisLockStore, String) {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let store = RedisLockStore::new(&url)
            .await
            .expect("Redis connection failed -- is Redis running?");
        (store, format!("test-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn redis_lock_set_if_absent_is_exclusive() {
        let (store, prefix) = test_store().await;
        let key = format!("{prefix}:job-42");
        let ttl = Duration::from_secs(5);
        assert!(store.set_if_absent(&key, "o1", ttl).await.unwrap());
        assert!(!store.set_if_absent(&key, "o2", ttl).await.unwrap());
        assert!(store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn redis_lock_delete_checks_owner() {
        let (store, prefix) = test_store().await;
        let key = format!("{prefix}:job-42");
        store
            .set_if_absent(&key, "o1", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!store.delete_if_owner(&key, "o2").await.unwrap());
        assert!(store.delete_if_owner(&key, "o1").await.unwrap());
        assert!(!store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn redis_lock_expires_server_side() {
        let (store, prefix) = test_store().await;
        let key = format!("{prefix}:job-42");
        store
            .set_if_absent(&key, "o1", Duration::from_millis(50))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!store.exists(&key).await.unwrap());
        assert!(store
            .set_if_absent(&key, "o2", Duration::from_secs(5))
            .await
            .unwrap());
    }
}
