//! Error types for GPU job coordination.
//!
//! The coordinator itself never returns these to its caller: job-level
//! failures are folded into [`ExecutionResult`](crate::types::ExecutionResult).
//! They surface from handle probes, lock acquisition, the job-state store,
//! checkpoint sinks and configuration loading.

use thiserror::Error;

use crate::store::backend::StorageError;

/// Errors raised by a [`JobHandle`](crate::client::JobHandle) probe.
///
/// # Examples
///
/// ```
/// use synde_gpu::JobError;
///
/// let err = JobError::Remote { message: "CUDA out of memory".to_string() };
/// assert_eq!(err.to_string(), "CUDA out of memory");
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// The result backend could not be reached
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure
        message: String,
    },

    /// The remote side reported an error while producing the value
    #[error("{message}")]
    Remote {
        /// Message reported by the remote side
        message: String,
    },

    /// A value was requested from a handle that is not ready or did not succeed
    #[error("job {handle_id} has no value")]
    NoValue {
        /// The handle that was probed
        handle_id: String,
    },

    /// The probe panicked
    #[error("job probe panicked: {message}")]
    Panicked {
        /// The panic payload, when it was a string
        message: String,
    },
}

/// Errors raised by lock acquisition.
///
/// A blocking acquire that exhausts its retries is not an error for
/// [`DistributedLock::acquire`](crate::lock::DistributedLock::acquire),
/// which returns `Ok(None)`. The scoped helpers convert that outcome into
/// [`LockError::NotAcquired`] so a critical section never runs unlocked.
#[derive(Error, Debug)]
pub enum LockError {
    /// The lock is held elsewhere and retries were exhausted
    #[error("could not acquire lock '{name}' after {attempts} attempt(s)")]
    NotAcquired {
        /// The lock name (without prefix)
        name: String,
        /// How many acquisition attempts were made
        attempts: u32,
    },

    /// The lock store failed
    #[error("lock store error: {0}")]
    Store(#[from] StorageError),
}

/// Errors raised by the job-state store.
#[derive(Error, Debug)]
pub enum StateError {
    /// The job-state guard could not be taken
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The KV backend failed or detected a concurrent write
    #[error("job state storage error: {0}")]
    Storage(#[from] StorageError),

    /// The stored record could not be (de)serialized
    #[error("job state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by a [`CheckpointSink`](crate::checkpoint::CheckpointSink).
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The sink rejected or failed to persist the snapshot
    #[error("checkpoint sink error: {0}")]
    Sink(String),
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML document could not be parsed
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be rendered as TOML
    #[error("cannot render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    /// An environment variable held a value that could not be parsed
    #[error("invalid value '{value}' for environment variable {var}")]
    InvalidEnv {
        /// Variable name as it appeared in the environment
        var: String,
        /// The offending value
        value: String,
    },

    /// A setting parsed but is outside the range the crate can honour
    #[error("invalid setting {field} = {value}: {reason}")]
    OutOfRange {
        /// Dotted path of the setting, e.g. `lock.timeout_secs`
        field: &'static str,
        /// The rejected value
        value: String,
        /// The accepted range
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_error_remote_displays_message_verbatim() {
        let err = JobError::Remote {
            message: "bad input".to_string(),
        };
        assert_eq!(err.to_string(), "bad input");
    }

    #[test]
    fn lock_error_names_lock_and_attempts() {
        let err = LockError::NotAcquired {
            name: "job-42".to_string(),
            attempts: 4,
        };
        assert_eq!(
            err.to_string(),
            "could not acquire lock 'job-42' after 4 attempt(s)"
        );
    }

    #[test]
    fn lock_error_wraps_storage_error() {
        let err: LockError = StorageError::Backend {
            message: "connection refused".to_string(),
            source: None,
        }
        .into();
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn state_error_is_transparent_over_lock_error() {
        let err: StateError = LockError::NotAcquired {
            name: "job-1".to_string(),
            attempts: 1,
        }
        .into();
        assert!(err.to_string().starts_with("could not acquire lock"));
    }

    #[test]
    fn config_error_invalid_env() {
        let err = ConfigError::InvalidEnv {
            var: "LOCK_MAX_RETRIES".to_string(),
            value: "many".to_string(),
        };
        assert!(err.to_string().contains("LOCK_MAX_RETRIES"));
        assert!(err.to_string().contains("many"));
    }

    #[test]
    fn config_error_out_of_range_names_field_and_bound() {
        let err = ConfigError::OutOfRange {
            field: "lock.timeout_secs",
            value: "0".to_string(),
            reason: "must be between 1 and 86400 seconds",
        };
        assert_eq!(
            err.to_string(),
            "invalid setting lock.timeout_secs = 0: must be between 1 and 86400 seconds"
        );
    }
}
