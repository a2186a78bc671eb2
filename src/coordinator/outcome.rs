//! Best-effort side effects of a coordinator run.
//!
//! Writing the pre-submission checkpoint and cancelling a timed-out job
//! must never change the run's result. These functions do the work, log
//! any failure at `warn`, and hand back an outcome the coordinator only
//! traces. Nothing here returns `Result` or panics.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;

use crate::checkpoint::{CheckpointMetadata, CheckpointSink};
use crate::client::{panic_message, JobHandle};

/// What happened to the pre-submission checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// The sink stored it under this id.
    Written(String),
    /// No sink or no state was configured.
    Skipped,
    /// The sink failed; submission went ahead anyway.
    Failed(String),
}

/// What happened to a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Requested,
    /// The request failed; the job may still be running remotely.
    Failed(String),
}

/// Writes `state` to `sink`, swallowing errors and panics.
pub fn write_checkpoint(
    sink: &dyn CheckpointSink,
    state: &Value,
    metadata: &CheckpointMetadata,
) -> CheckpointOutcome {
    match catch_unwind(AssertUnwindSafe(|| sink.put(state, metadata))) {
        Ok(Ok(id)) => {
            tracing::debug!(checkpoint = %id, stage = %metadata.stage, task = %metadata.task, "checkpoint written");
            CheckpointOutcome::Written(id)
        }
        Ok(Err(e)) => {
            tracing::warn!(stage = %metadata.stage, task = %metadata.task, error = %e, "checkpoint failed; continuing");
            CheckpointOutcome::Failed(e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::warn!(stage = %metadata.stage, task = %metadata.task, error = %message, "checkpoint sink panicked; continuing");
            CheckpointOutcome::Failed(message)
        }
    }
}

/// Forcefully cancels `handle`, swallowing errors and panics.
pub fn cancel_forcefully(handle: &dyn JobHandle) -> CancelOutcome {
    match catch_unwind(AssertUnwindSafe(|| handle.cancel(true))) {
        Ok(Ok(())) => CancelOutcome::Requested,
        Ok(Err(e)) => {
            tracing::warn!(handle_id = %handle.id(), error = %e, "cancel request failed");
            CancelOutcome::Failed(e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::warn!(handle_id = %handle.id(), error = %message, "cancel request panicked");
            CancelOutcome::Failed(message)
        }
    }
}
