//! Redis storage backend for job-state persistence.
//!
//! [`RedisBackend`] implements [`StorageBackend`] on top of Redis so that
//! coordinators in different processes share one job-state record per job.
//! Reads use `HGETALL`; writes are Lua scripts (`redis::Script`) that update
//! the record hash and the namespace index in a single round-trip.
//!
//! # Key Schema
//!
//! | Key Pattern | Type | Purpose |
//! |-------------|------|---------|
//! | `{prefix}:{namespace}:{id}` | Hash | Record storage (`version`, `data`) |
//! | `{prefix}:idx:{namespace}` | Set | Ids stored under the namespace |
//!
//! # Usage
//!
//! ```rust,no_run
//! use synde_gpu::store::redis::RedisBackend;
//!
//! # async fn example() {
//! let backend = RedisBackend::new("redis://127.0.0.1:6379").await.unwrap();
//! # }
//! ```

use std::collections::HashMap;

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;

use crate::store::backend::{StorageBackend, StorageError, VersionedRecord};

// ---------------------------------------------------------------------------
// Lua script constants
// ---------------------------------------------------------------------------

/// Unconditional put.
///
/// KEYS[1] = record hash key, KEYS[2] = namespace index set key.
/// ARGV[1] = data, ARGV[2] = id. Returns the new version number.
const LUA_PUT: &str = r#"
local current_version = redis.call('HGET', KEYS[1], 'version')
local new_version
if current_version then
    new_version = tonumber(current_version) + 1
else
    new_version = 1
end
redis.call('HSET', KEYS[1], 'version', tostring(new_version), 'data', ARGV[1])
redis.call('SADD', KEYS[2], ARGV[2])
return new_version
"#;

/// Conditional put (CAS). An expected version of 0 means "must not exist".
///
/// KEYS as for [`LUA_PUT`]. ARGV[1] = data, ARGV[2] = expected version,
/// ARGV[3] = id. Returns {1, new_version} on success, {0, actual} on
/// mismatch (actual is 0 when the key is absent).
const LUA_PUT_IF_VERSION: &str = r#"
local current_version = redis.call('HGET', KEYS[1], 'version')
local actual = 0
if current_version then
    actual = tonumber(current_version)
end
if actual ~= tonumber(ARGV[2]) then
    return {0, actual}
end
local new_version = actual + 1
redis.call('HSET', KEYS[1], 'version', tostring(new_version), 'data', ARGV[1])
redis.call('SADD', KEYS[2], ARGV[3])
return {1, new_version}
"#;

/// Delete the record hash and its index entry.
///
/// Returns 1 if the key existed, 0 otherwise.
const LUA_DELETE: &str = r#"
local existed = redis.call('EXISTS', KEYS[1])
redis.call('SREM', KEYS[2], ARGV[1])
if existed == 1 then
    redis.call('DEL', KEYS[1])
    return 1
end
return 0
"#;

/// Redis storage backend for job-state records.
///
/// Holds a [`MultiplexedConnection`]; clones share one TCP connection.
#[derive(Debug, Clone)]
pub struct RedisBackend {
    conn: MultiplexedConnection,
    key_prefix: String,
}

impl RedisBackend {
    /// Connects to Redis at the given URL with the default key prefix `"synde"`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if the client cannot be created or
    /// the connection cannot be established.
    pub async fn new(url: &str) -> Result<Self, StorageError> {
        let conn = connect(url).await?;
        Ok(Self::with_connection(conn))
    }

    /// Creates a backend with a pre-built multiplexed connection.
    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            key_prefix: "synde".to_string(),
        }
    }

    /// Sets a custom key prefix (builder pattern).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn record_key(&self, namespace: &str, id: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, namespace, id)
    }

    fn index_key(&self, namespace: &str) -> String {
        format!("{}:idx:{}", self.key_prefix, namespace)
    }
}

/// Opens a multiplexed async connection, mapping failures to [`StorageError`].
pub(crate) async fn connect(url: &str) -> Result<MultiplexedConnection, StorageError> {
    let client = ::redis::Client::open(url).map_err(|e| StorageError::Backend {
        message: format!("failed to create Redis client: {e}"),
        source: Some(Box::new(e)),
    })?;
    client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| StorageError::Backend {
            message: format!("failed to connect to Redis: {e}"),
            source: Some(Box::new(e)),
        })
}

/// Maps a Redis error to a [`StorageError::Backend`].
pub(crate) fn map_redis_error(err: ::redis::RedisError, key: &str) -> StorageError {
    StorageError::Backend {
        message: format!("Redis error for key {key}: {err}"),
        source: Some(Box::new(err)),
    }
}

fn split_key(key: &str) -> Result<(&str, &str), StorageError> {
    key.split_once(':').ok_or_else(|| StorageError::Backend {
        message: format!("invalid key format (missing ':'): {key}"),
        source: None,
    })
}

fn utf8(data: &[u8]) -> Result<&str, StorageError> {
    std::str::from_utf8(data).map_err(|e| StorageError::Backend {
        message: format!("data is not valid UTF-8: {e}"),
        source: Some(Box::new(e)),
    })
}

fn versioned_from_fields(
    key: &str,
    fields: &HashMap<String, String>,
) -> Result<VersionedRecord, StorageError> {
    let version: u64 = fields
        .get("version")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| StorageError::Backend {
            message: format!("missing or invalid version field for key {key}"),
            source: None,
        })?;
    let data = fields.get("data").ok_or_else(|| StorageError::Backend {
        message: format!("missing data field for key {key}"),
        source: None,
    })?;
    Ok(VersionedRecord {
        data: data.as_bytes().to_vec(),
        version,
    })
}

#[async_trait]
impl StorageBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError> {
        let (namespace, id) = split_key(key)?;
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(self.record_key(namespace, id))
            .await
            .map_err(|e| map_redis_error(e, key))?;
        if fields.is_empty() {
            return Err(StorageError::NotFound {
                key: key.to_string(),
            });
        }
        versioned_from_fields(key, &fields)
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
        let (namespace, id) = split_key(key)?;
        let new_version: u64 = Script::new(LUA_PUT)
            .key(self.record_key(namespace, id))
            .key(self.index_key(namespace))
            .arg(utf8(data)?)
            .arg(id)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, key))?;
        Ok(new_version)
    }

    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let (namespace, id) = split_key(key)?;
        let result: (i64, i64) = Script::new(LUA_PUT_IF_VERSION)
            .key(self.record_key(namespace, id))
            .key(self.index_key(namespace))
            .arg(utf8(data)?)
            .arg(expected_version)
            .arg(id)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, key))?;

        match result.0 {
            1 => Ok(result.1 as u64),
            _ => Err(StorageError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: result.1 as u64,
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let (namespace, id) = split_key(key)?;
        let result: i64 = Script::new(LUA_DELETE)
            .key(self.record_key(namespace, id))
            .key(self.index_key(namespace))
            .arg(id)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, key))?;
        Ok(result == 1)
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError> {
        let namespace = prefix
            .strip_suffix(':')
            .ok_or_else(|| StorageError::Backend {
                message: format!("invalid prefix format (missing trailing ':'): {prefix}"),
                source: None,
            })?;
        let index_key = self.index_key(namespace);
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .smembers(&index_key)
            .await
            .map_err(|e| map_redis_error(e, prefix))?;

        let mut results = Vec::with_capacity(ids.len());
        let mut orphaned: Vec<String> = Vec::new();
        for id in ids {
            let fields: HashMap<String, String> = conn
                .hgetall(self.record_key(namespace, &id))
                .await
                .map_err(|e| map_redis_error(e, prefix))?;
            if fields.is_empty() {
                orphaned.push(id);
                continue;
            }
            let key = format!("{namespace}:{id}");
            let record = versioned_from_fields(&key, &fields)?;
            results.push((key, record));
        }

        if !orphaned.is_empty() {
            let removed: i64 = conn
                .srem(&index_key, &orphaned)
                .await
                .map_err(|e| map_redis_error(e, prefix))?;
            tracing::debug!(removed, namespace, "pruned orphaned index entries");
        }
        Ok(results)
    }
}
