//! Low-level key-value storage backend trait and supporting types.
//!
//! The [`StorageBackend`] trait defines the contract that every job-state
//! storage engine implements: [`get`](StorageBackend::get),
//! [`put`](StorageBackend::put), [`put_if_version`](StorageBackend::put_if_version),
//! [`delete`](StorageBackend::delete) and
//! [`list_by_prefix`](StorageBackend::list_by_prefix).
//!
//! Domain logic (entry updates, status transitions, serialization) does
//! **not** belong here. Backends are dumb KV stores; domain logic lives in
//! [`JobStateStore`](crate::store::job_state::JobStateStore).
//!
//! # Key Structure
//!
//! Keys are composite strings in the format `{namespace}:{id}`, for
//! example `job_state:7f3c...`. Prefix queries use `{namespace}:`.
//!
//! # Versioning
//!
//! Each stored record carries a monotonic `u64` version number starting at
//! 1, incremented on every successful write. Version 0 denotes "absent":
//! [`put_if_version`](StorageBackend::put_if_version) with an expected
//! version of 0 only succeeds when the key does not exist yet.

use std::fmt;

use async_trait::async_trait;

/// A stored record paired with its monotonic version number.
///
/// # Examples
///
/// ```
/// use synde_gpu::store::backend::VersionedRecord;
///
/// let record = VersionedRecord {
///     data: b"{}".to_vec(),
///     version: 1,
/// };
/// assert_eq!(record.version, 1);
/// ```
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    /// The serialized record bytes (canonical JSON).
    pub data: Vec<u8>,

    /// Monotonic version number. Starts at 1, increments on each
    /// successful write.
    pub version: u64,
}

/// Errors that can occur during raw storage operations.
///
/// Shared by the job-state backends and the lock stores. The job-state
/// store wraps them in [`StateError`](crate::error::StateError); lock
/// stores wrap them in [`LockError`](crate::error::LockError).
///
/// # Examples
///
/// ```
/// use synde_gpu::store::backend::StorageError;
///
/// let err = StorageError::NotFound { key: "job_state:job-1".to_string() };
/// assert!(err.to_string().contains("job_state:job-1"));
///
/// let err = StorageError::VersionConflict {
///     key: "k".to_string(),
///     expected: 2,
///     actual: 3,
/// };
/// assert!(err.to_string().contains("expected 2"));
/// ```
#[derive(Debug)]
pub enum StorageError {
    /// The requested key was not found in storage.
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// A [`put_if_version`](StorageBackend::put_if_version) call failed
    /// because the stored version does not match the expected version.
    VersionConflict {
        /// The key where the conflict occurred.
        key: String,
        /// The version the caller expected.
        expected: u64,
        /// The actual version found in storage (0 when absent).
        actual: u64,
    },

    /// An I/O or backend-specific error occurred (e.g., network failure,
    /// connection refused, script error).
    Backend {
        /// Human-readable description of the error.
        message: String,
        /// The underlying error, if available. Accessible via
        /// [`std::error::Error::source()`].
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { key } => write!(f, "key not found: {key}"),
            Self::VersionConflict {
                key,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on key {key}: expected {expected}, found {actual}"
            ),
            Self::Backend { message, .. } => write!(f, "backend error: {message}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend {
                source: Some(src), ..
            } => Some(src.as_ref()),
            _ => None,
        }
    }
}

/// Key-value storage backend for job-state persistence.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; many coordinators complete
/// concurrently and record their results through the same backend.
///
/// # No Domain Logic
///
/// Backends never interpret the bytes they store.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a record by key.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no record exists for the given key.
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError>;

    /// Stores a record unconditionally (create or overwrite), returning
    /// the assigned version.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError>;

    /// Stores a record only if the current version matches `expected_version`.
    ///
    /// An `expected_version` of 0 means the key must not exist yet.
    ///
    /// # Errors
    ///
    /// - [`StorageError::VersionConflict`] if the stored version (0 when
    ///   absent) does not match `expected_version`.
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError>;

    /// Deletes a record by key. Returns `false` if the key did not exist.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Lists all records whose key starts with the given prefix.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError>;
}

/// Constructs a storage key from a namespace and an identifier.
///
/// # Examples
///
/// ```
/// use synde_gpu::store::backend::make_key;
///
/// assert_eq!(make_key("job_state", "job-42"), "job_state:job-42");
/// ```
pub fn make_key(namespace: &str, id: &str) -> String {
    format!("{namespace}:{id}")
}

/// Parses a storage key into `(namespace, id)`, splitting on the first colon.
///
/// # Examples
///
/// ```
/// use synde_gpu::store::backend::parse_key;
///
/// assert_eq!(parse_key("job_state:job-42"), Some(("job_state", "job-42")));
/// assert_eq!(parse_key("no-colon"), None);
/// ```
pub fn parse_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
}

/// Constructs the listing prefix for a namespace.
pub fn make_prefix(namespace: &str) -> String {
    format!("{namespace}:")
}
