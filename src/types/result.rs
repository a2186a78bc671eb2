//! The uniform result envelope returned by every coordinator invocation.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::status::ExecutionStatus;

/// Outcome of one coordinator invocation.
///
/// Fields are private so the envelope invariant holds for every value in
/// existence, including deserialized ones:
///
/// - `status == Success` iff `payload` is present and `error` is absent
/// - `status` is `Failure` or `Timeout` iff `error` is present
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use synde_gpu::{ExecutionResult, ExecutionStatus};
///
/// let ok = ExecutionResult::success(json!({"ec_number": "3.2.1.17"}), Some("t-1".into()), 2.5);
/// assert_eq!(ok.status(), ExecutionStatus::Success);
/// assert!(ok.error().is_none());
///
/// let late = ExecutionResult::timeout(180, Some("t-2".into()), 180.4);
/// assert_eq!(late.error(), Some("Task timed out after 180s"));
/// assert!(late.payload().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawExecutionResult")]
pub struct ExecutionResult {
    status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    handle_id: Option<String>,
    elapsed_seconds: f64,
}

#[derive(Deserialize)]
struct RawExecutionResult {
    status: ExecutionStatus,
    #[serde(default, deserialize_with = "present_value")]
    payload: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    handle_id: Option<String>,
    #[serde(default)]
    elapsed_seconds: f64,
}

// A present `null` payload is a value, not an absent payload.
fn present_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawExecutionResult> for ExecutionResult {
    type Error = String;

    fn try_from(raw: RawExecutionResult) -> Result<Self, Self::Error> {
        let consistent = match raw.status {
            ExecutionStatus::Success => raw.payload.is_some() && raw.error.is_none(),
            ExecutionStatus::Failure | ExecutionStatus::Timeout => {
                raw.error.is_some() && raw.payload.is_none()
            }
            _ => raw.payload.is_none() && raw.error.is_none(),
        };
        if !consistent {
            return Err(format!(
                "inconsistent execution result: status {} with payload={} error={}",
                raw.status,
                raw.payload.is_some(),
                raw.error.is_some()
            ));
        }
        Ok(Self {
            status: raw.status,
            payload: raw.payload,
            error: raw.error,
            handle_id: raw.handle_id,
            elapsed_seconds: sanitize_elapsed(raw.elapsed_seconds),
        })
    }
}

fn sanitize_elapsed(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}

impl ExecutionResult {
    /// A finished job with its payload.
    pub fn success(payload: Value, handle_id: Option<String>, elapsed_seconds: f64) -> Self {
        Self {
            status: ExecutionStatus::Success,
            payload: Some(payload),
            error: None,
            handle_id,
            elapsed_seconds: sanitize_elapsed(elapsed_seconds),
        }
    }

    /// A job that failed, remotely or while being polled.
    pub fn failure(
        error: impl Into<String>,
        handle_id: Option<String>,
        elapsed_seconds: f64,
    ) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            payload: None,
            error: Some(error.into()),
            handle_id,
            elapsed_seconds: sanitize_elapsed(elapsed_seconds),
        }
    }

    /// A job that exceeded `timeout_secs` and was cancelled.
    pub fn timeout(
        timeout_secs: impl std::fmt::Display,
        handle_id: Option<String>,
        elapsed_seconds: f64,
    ) -> Self {
        Self {
            status: ExecutionStatus::Timeout,
            payload: None,
            error: Some(format!("Task timed out after {timeout_secs}s")),
            handle_id,
            elapsed_seconds: sanitize_elapsed(elapsed_seconds),
        }
    }

    /// A job cancelled before it produced anything.
    pub fn cancelled(handle_id: Option<String>, elapsed_seconds: f64) -> Self {
        Self::in_flight(ExecutionStatus::Cancelled, handle_id, elapsed_seconds)
    }

    /// A result carrying neither payload nor error.
    ///
    /// Only `Started` and `Cancelled` are kept; any other status becomes
    /// `Pending`.
    pub fn in_flight(
        status: ExecutionStatus,
        handle_id: Option<String>,
        elapsed_seconds: f64,
    ) -> Self {
        let status = match status {
            ExecutionStatus::Started | ExecutionStatus::Cancelled => status,
            _ => ExecutionStatus::Pending,
        };
        Self {
            status,
            payload: None,
            error: None,
            handle_id,
            elapsed_seconds: sanitize_elapsed(elapsed_seconds),
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn handle_id(&self) -> Option<&str> {
        self.handle_id.as_deref()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Converts a non-success result into a note for the pipeline response.
    ///
    /// A `load_bearing` stage is one every later stage depends on (no
    /// structure at all, for example); its note is marked non-recoverable.
    /// Returns `None` for successful results.
    ///
    /// # Examples
    ///
    /// ```
    /// use synde_gpu::ExecutionResult;
    ///
    /// let failed = ExecutionResult::failure("bad input", None, 0.2);
    /// let note = failed.stage_note("stability", false).unwrap();
    /// assert!(note.recoverable);
    /// assert_eq!(note.message, "bad input");
    /// ```
    pub fn stage_note(&self, stage: &str, load_bearing: bool) -> Option<StageNote> {
        if self.is_success() {
            return None;
        }
        let message = match (&self.error, self.status) {
            (Some(error), _) => error.clone(),
            (None, status) => format!("job ended in status {status}"),
        };
        Some(StageNote {
            stage: stage.to_string(),
            message,
            recoverable: !load_bearing,
        })
    }
}

/// A failure or timeout attached to the overall pipeline response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageNote {
    /// The pipeline stage that produced the note.
    pub stage: String,
    /// What went wrong.
    pub message: String,
    /// `false` when later stages cannot proceed without this one.
    pub recoverable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_round_trips_through_json() {
        let result = ExecutionResult::success(json!({"value": 42}), Some("h".into()), 1.5);
        let text = serde_json::to_string(&result).unwrap();
        let back: ExecutionResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn deserialize_rejects_success_with_error() {
        let bad = json!({
            "status": "success",
            "payload": 1,
            "error": "boom",
            "elapsed_seconds": 0.0
        });
        assert!(serde_json::from_value::<ExecutionResult>(bad).is_err());
    }

    #[test]
    fn deserialize_rejects_failure_without_error() {
        let bad = json!({"status": "failure", "elapsed_seconds": 0.0});
        assert!(serde_json::from_value::<ExecutionResult>(bad).is_err());
    }

    #[test]
    fn null_payload_survives_round_trip() {
        let result = ExecutionResult::success(json!(null), None, 0.0);
        let text = serde_json::to_string(&result).unwrap();
        let back: ExecutionResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back.payload(), Some(&json!(null)));
    }

    #[test]
    fn negative_or_nan_elapsed_is_clamped() {
        assert_eq!(ExecutionResult::failure("x", None, -3.0).elapsed_seconds(), 0.0);
        assert_eq!(ExecutionResult::failure("x", None, f64::NAN).elapsed_seconds(), 0.0);
    }

    #[test]
    fn timeout_message_names_configured_timeout() {
        let result = ExecutionResult::timeout(1, None, 1.1);
        assert_eq!(result.error(), Some("Task timed out after 1s"));
    }

    #[test]
    fn in_flight_never_claims_a_result_status() {
        let result = ExecutionResult::in_flight(ExecutionStatus::Success, None, 0.0);
        assert_eq!(result.status(), ExecutionStatus::Pending);
        assert!(result.payload().is_none());
    }

    #[test]
    fn stage_note_is_non_recoverable_for_load_bearing_stage() {
        let result = ExecutionResult::timeout(180, None, 181.0);
        let note = result.stage_note("structure", true).unwrap();
        assert!(!note.recoverable);
        assert_eq!(note.stage, "structure");
    }

    #[test]
    fn stage_note_none_for_success() {
        let result = ExecutionResult::success(json!(null), None, 0.0);
        assert!(result.stage_note("any", false).is_none());
    }
}
