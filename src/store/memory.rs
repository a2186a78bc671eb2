//! In-memory storage backend.
//!
//! [`InMemoryBackend`] provides a thread-safe [`StorageBackend`] using
//! `DashMap<String, (Vec<u8>, u64)>`. It only shares state within one
//! process; use the Redis backend when coordinators run in several
//! processes.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::store::backend::{StorageBackend, StorageError, VersionedRecord};

/// Thread-safe in-memory storage backend using [`DashMap`].
///
/// # Examples
///
/// ```
/// use synde_gpu::store::memory::InMemoryBackend;
///
/// let backend = InMemoryBackend::new();
/// assert!(backend.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: DashMap<String, (Vec<u8>, u64)>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError> {
        let entry = self.data.get(key).ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        let (data, version) = entry.value();
        Ok(VersionedRecord {
            data: data.clone(),
            version: *version,
        })
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let new_version = entry.get().1 + 1;
                entry.insert((data.to_vec(), new_version));
                Ok(new_version)
            }
            Entry::Vacant(entry) => {
                entry.insert((data.to_vec(), 1));
                Ok(1)
            }
        }
    }

    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let current_version = entry.get().1;
                if current_version != expected_version {
                    return Err(StorageError::VersionConflict {
                        key: key.to_string(),
                        expected: expected_version,
                        actual: current_version,
                    });
                }
                let new_version = current_version + 1;
                entry.insert((data.to_vec(), new_version));
                Ok(new_version)
            }
            Entry::Vacant(entry) => {
                if expected_version != 0 {
                    return Err(StorageError::VersionConflict {
                        key: key.to_string(),
                        expected: expected_version,
                        actual: 0,
                    });
                }
                entry.insert((data.to_vec(), 1));
                Ok(1)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.remove(key).is_some())
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError> {
        let results = self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| {
                let (data, version) = entry.value();
                (
                    entry.key().clone(),
                    VersionedRecord {
                        data: data.clone(),
                        version: *version,
                    },
                )
            })
            .collect();
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_assigns_increasing_versions() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.put("ns:a", b"1").await.unwrap(), 1);
        assert_eq!(backend.put("ns:a", b"2").await.unwrap(), 2);
        let record = backend.get("ns:a").await.unwrap();
        assert_eq!(record.data, b"2");
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let backend = InMemoryBackend::new();
        let result = backend.get("ns:missing").await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn put_if_version_zero_creates_only_when_absent() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.put_if_version("ns:a", b"x", 0).await.unwrap(), 1);
        let second = backend.put_if_version("ns:a", b"y", 0).await;
        assert!(matches!(
            second,
            Err(StorageError::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn put_if_version_rejects_stale_version() {
        let backend = InMemoryBackend::new();
        backend.put("ns:a", b"x").await.unwrap();
        backend.put("ns:a", b"y").await.unwrap();
        let stale = backend.put_if_version("ns:a", b"z", 1).await;
        assert!(matches!(
            stale,
            Err(StorageError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            })
        ));
        assert_eq!(backend.put_if_version("ns:a", b"z", 2).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn put_if_version_on_missing_key_with_nonzero_version_conflicts() {
        let backend = InMemoryBackend::new();
        let result = backend.put_if_version("ns:a", b"x", 4).await;
        assert!(matches!(
            result,
            Err(StorageError::VersionConflict { actual: 0, .. })
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = InMemoryBackend::new();
        backend.put("ns:a", b"x").await.unwrap();
        assert!(backend.delete("ns:a").await.unwrap());
        assert!(!backend.delete("ns:a").await.unwrap());
    }

    #[tokio::test]
    async fn list_by_prefix_scopes_to_namespace() {
        let backend = InMemoryBackend::new();
        backend.put("job_state:a", b"1").await.unwrap();
        backend.put("job_state:b", b"2").await.unwrap();
        backend.put("other:c", b"3").await.unwrap();
        let mut keys: Vec<String> = backend
            .list_by_prefix("job_state:")
            .await
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["job_state:a", "job_state:b"]);
    }
}
