//! Execution status shared by results and job-state entries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of one remote job.
///
/// `Pending` and `Started` describe work in flight; the remaining states
/// are terminal. Job-state entries move forward only:
///
/// ```text
/// Pending -> Started, Success, Failure, Timeout, Cancelled
/// Started -> Success, Failure, Timeout, Cancelled
/// Success | Failure | Timeout | Cancelled -> (terminal)
/// ```
///
/// # Examples
///
/// ```
/// use synde_gpu::ExecutionStatus;
///
/// assert!(!ExecutionStatus::Started.is_terminal());
/// assert!(ExecutionStatus::Timeout.is_terminal());
/// assert!(ExecutionStatus::Pending.can_transition_to(&ExecutionStatus::Started));
/// assert!(!ExecutionStatus::Success.can_transition_to(&ExecutionStatus::Failure));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Submitted, not yet picked up by a worker.
    Pending,
    /// A worker is running the job.
    Started,
    /// Finished with a payload (terminal).
    Success,
    /// Finished with an error (terminal).
    Failure,
    /// Exceeded its timeout and was cancelled (terminal).
    Timeout,
    /// Cancelled before completing (terminal).
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Started => write!(f, "started"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl ExecutionStatus {
    /// Returns `true` for `Success`, `Failure`, `Timeout` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Timeout | Self::Cancelled
        )
    }

    /// Returns `true` if an entry in this status may move to `next`.
    ///
    /// Self-transitions are rejected, as is any move out of a terminal
    /// status or back to `Pending`.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        if self == next || self.is_terminal() {
            return false;
        }
        match self {
            Self::Pending => true,
            Self::Started => !matches!(next, Self::Pending),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ExecutionStatus; 6] = [
        ExecutionStatus::Pending,
        ExecutionStatus::Started,
        ExecutionStatus::Success,
        ExecutionStatus::Failure,
        ExecutionStatus::Timeout,
        ExecutionStatus::Cancelled,
    ];

    #[test]
    fn display_matches_serde() {
        for status in ALL {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, serde_json::Value::String(status.to_string()));
        }
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(&to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn started_cannot_return_to_pending() {
        assert!(!ExecutionStatus::Started.can_transition_to(&ExecutionStatus::Pending));
        assert!(ExecutionStatus::Started.can_transition_to(&ExecutionStatus::Timeout));
    }
}
