//! The poll loop shared by the async and blocking coordinators.
//!
//! [`PollLoop::step`] does one iteration and says what to do next, so
//! both drivers only differ in how they wait.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use serde_json::Value;

use super::outcome::{self, CancelOutcome};
use crate::checkpoint::{ProgressCallback, ProgressPhase};
use crate::client::{panic_message, JobHandle};
use crate::constants::UNKNOWN_ERROR;
use crate::error::JobError;
use crate::types::ExecutionResult;

pub(crate) type Clock = fn() -> Instant;

/// How far past the deadline the last wait lands, so the next step sees
/// `elapsed > timeout`.
const DEADLINE_OVERSHOOT: Duration = Duration::from_millis(1);

pub(crate) enum Step {
    Done(ExecutionResult),
    Wait(Duration),
}

pub(crate) struct PollLoop<'a> {
    pub(crate) handle: Box<dyn JobHandle>,
    pub(crate) label: &'a str,
    pub(crate) timeout: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) checkpoint_interval: Duration,
    pub(crate) progress: Option<&'a ProgressCallback>,
    pub(crate) clock: Clock,
    pub(crate) started: Instant,
    pub(crate) last_progress: Instant,
}

impl PollLoop<'_> {
    /// Timeout, then readiness, then progress, then wait.
    pub(crate) fn step(&mut self) -> Step {
        let now = (self.clock)();
        let elapsed = now.saturating_duration_since(self.started);

        if elapsed > self.timeout {
            let cancel = outcome::cancel_forcefully(self.handle.as_ref());
            tracing::warn!(
                task = %self.label,
                handle_id = %self.handle.id(),
                elapsed_secs = elapsed.as_secs_f64(),
                cancelled = matches!(cancel, CancelOutcome::Requested),
                "GPU job timed out"
            );
            return Step::Done(ExecutionResult::timeout(
                display_secs(self.timeout),
                Some(self.handle.id().to_string()),
                elapsed.as_secs_f64(),
            ));
        }

        match probe(|| self.handle.is_ready()) {
            Ok(true) => return Step::Done(self.finish()),
            Ok(false) => {}
            Err(message) => {
                tracing::warn!(task = %self.label, handle_id = %self.handle.id(), error = %message, "readiness probe failed");
                return Step::Done(ExecutionResult::failure(
                    message,
                    Some(self.handle.id().to_string()),
                    self.elapsed_secs(),
                ));
            }
        }

        if now.saturating_duration_since(self.last_progress) >= self.checkpoint_interval {
            self.report_progress(elapsed);
            self.last_progress = now;
        }

        let remaining = self.timeout.saturating_sub(elapsed);
        Step::Wait(
            self.poll_interval
                .min(remaining.saturating_add(DEADLINE_OVERSHOOT)),
        )
    }

    fn finish(&self) -> ExecutionResult {
        let handle_id = Some(self.handle.id().to_string());
        let outcome = probe(|| -> Result<Result<Value, Option<String>>, JobError> {
            if self.handle.succeeded()? {
                Ok(Ok(self.handle.value()?))
            } else {
                Ok(Err(self.handle.failure_info()?))
            }
        });
        let elapsed = self.elapsed_secs();
        match outcome {
            Ok(Ok(value)) => ExecutionResult::success(value, handle_id, elapsed),
            Ok(Err(info)) => {
                let message = info
                    .filter(|info| !info.is_empty())
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                ExecutionResult::failure(message, handle_id, elapsed)
            }
            Err(message) => ExecutionResult::failure(message, handle_id, elapsed),
        }
    }

    fn report_progress(&self, elapsed: Duration) {
        let Some(progress) = self.progress else {
            return;
        };
        let handle_id = self.handle.id();
        let call = catch_unwind(AssertUnwindSafe(|| {
            progress(handle_id, ProgressPhase::Started, elapsed.as_secs_f64())
        }));
        if let Err(panic) = call {
            tracing::warn!(task = %self.label, handle_id = %handle_id, error = %panic_message(panic.as_ref()), "progress callback panicked");
        }
    }

    fn elapsed_secs(&self) -> f64 {
        (self.clock)()
            .saturating_duration_since(self.started)
            .as_secs_f64()
    }
}

/// Runs one handle probe, turning errors and panics into a message.
pub(crate) fn probe<T>(f: impl FnOnce() -> Result<T, JobError>) -> Result<T, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(JobError::Panicked {
            message: panic_message(panic.as_ref()),
        }
        .to_string()),
    }
}

/// `180` for whole seconds, `0.5` otherwise.
pub(crate) fn display_secs(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        duration.as_secs_f64().to_string()
    }
}
