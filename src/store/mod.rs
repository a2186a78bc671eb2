//! Job-state storage.
//!
//! # Architecture
//!
//! Two layers:
//!
//! 1. **[`JobStateStore<B>`](job_state::JobStateStore)** -- All domain logic
//!    (entry updates, status transitions, canonical serialization, guarded
//!    read-modify-write with CAS commits).
//!
//! 2. **[`StorageBackend`]** -- Dumb KV trait that backends implement
//!    (in-memory, Redis). No domain logic.
//!
//! # Backends
//!
//! - [`InMemoryBackend`](crate::store::memory::InMemoryBackend) -- Thread-safe
//!   in-memory backend using `DashMap`.
//! - [`RedisBackend`](crate::store::redis::RedisBackend) -- Redis backend for
//!   multi-process deployments. Available behind the `redis` feature flag.

pub mod backend;
pub mod job_state;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use backend::{StorageBackend, StorageError, VersionedRecord};
pub use memory::InMemoryBackend;
