//! Key prefixes, lane names and tags shared across the crate.

/// Lane that GPU-backed inference jobs are dispatched to.
pub const GPU_QUEUE: &str = "gpu";

/// Key prefix for general-purpose distributed locks.
pub const LOCK_PREFIX: &str = "synde:lock";

/// Key prefix for job-state update locks.
pub const STATE_LOCK_PREFIX: &str = "synde:state_lock";

/// Key prefix for GPU lane locks.
pub const GPU_LOCK_PREFIX: &str = "synde:gpu";

/// Key namespace for job-state records in the KV backend.
pub const JOB_STATE_NAMESPACE: &str = "job_state";

/// Checkpoint stage written immediately before a job is submitted.
pub const STAGE_PRE_SUBMIT: &str = "pre_submit";

/// Failure message used when a job failed without reporting why.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Prefix accepted in front of every environment variable name.
pub const ENV_PREFIX: &str = "SYNDE_";
