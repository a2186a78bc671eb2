//! GPU job coordination for the SynDe protein-engineering pipeline.
//!
//! This crate owns the lifecycle of expensive remote inference jobs
//! (structure folding, enzyme classification, kinetic and thermal
//! property prediction): it checkpoints state before submission, submits
//! work to a separate lane, polls for completion without blocking the
//! caller's scheduler, enforces timeouts with forceful cancellation, and
//! serializes updates to shared job state under a distributed lock.
//!
//! # Overview
//!
//! A [`TaskCoordinator`] is built for one job kind with a timeout and a
//! poll interval. [`TaskCoordinator::execute`] suspends cooperatively
//! between polls; [`TaskCoordinator::execute_blocking`] sleeps the calling
//! thread. Both return the same [`ExecutionResult`] and never panic or
//! return an error: every failure mode is folded into the result status.
//!
//! Callers that record a finished job into the shared [`JobStateRecord`]
//! do so through [`JobStateStore`], which performs every read-modify-write
//! while holding the [`JobStateGuard`] for that job id.
//!
//! # Module Organization
//!
//! - [`types`] - Result envelope, status, job kinds and requests
//! - [`client`] - Remote job client boundary, offline stand-ins, worker lane
//! - [`lock`] - Distributed mutual-exclusion lock and its specializations
//! - [`coordinator`] - Submit, poll, timeout and cancel lifecycle
//! - [`checkpoint`] - Pre-submission checkpoint sink and progress callback
//! - [`store`] - Versioned KV backends and the job-state store
//! - [`domain`] - The shared job-state record
//! - [`joblog`] - Per-job progress log with an explicit job id
//! - [`config`] - Configuration from TOML or the environment
//! - [`error`] - Error types

pub mod checkpoint;
pub mod client;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod joblog;
pub mod lock;
#[cfg(feature = "logging")]
pub mod logging;
pub mod store;
pub mod types;

// Re-exports for ergonomic access
pub use checkpoint::{
    CheckpointMetadata, CheckpointSink, CheckpointSnapshot, MemoryCheckpointSink,
    ProgressCallback, ProgressPhase,
};
pub use client::{
    client_from_config, DispatchMode, JobClient, JobHandle, LaneClient, OfflineClient, Submission,
};
pub use config::GpuConfig;
pub use coordinator::{CoordinatorConfig, TaskCoordinator};
pub use domain::{GpuTaskEntry, JobStateRecord};
pub use error::{CheckpointError, ConfigError, JobError, LockError, StateError};
pub use joblog::{JobLog, LogEntry, LogSink, MemoryLogSink};
pub use lock::{
    DistributedLock, GpuLaneLock, InMemoryLockStore, JobStateGuard, LockGuard, LockOptions,
    LockStore, LockToken,
};
pub use store::job_state::JobStateStore;
pub use types::{
    ExecutionResult, ExecutionStatus, JobArgs, JobKind, JobRequest, StageNote,
};
