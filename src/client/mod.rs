//! The remote job client boundary.
//!
//! A [`JobClient`] turns a [`JobRequest`] into a [`Submission`]: either an
//! immediate value or a [`JobHandle`] for work running elsewhere.
//! Submission never fails; every failure surfaces later through the
//! handle.
//!
//! # Implementations
//!
//! - [`OfflineClient`] -- deterministic same-process stand-ins, selected
//!   when [`GpuConfig::offline`] is set.
//! - [`LaneClient`] -- runs registered handlers on a dedicated worker
//!   runtime (the `gpu` lane), separate from the caller's scheduler.

pub mod lane;
pub mod offline;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GpuConfig;
use crate::error::JobError;
use crate::types::JobRequest;

pub use lane::{LaneClient, LaneHandler, LaneJob};
pub use offline::OfflineClient;

/// One in-flight remote computation.
///
/// Probes are synchronous and cheap: they read state that the remote side
/// updates. A handle becomes ready exactly once and is never reused.
pub trait JobHandle: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    /// Whether the job finished, failed or was cancelled.
    fn is_ready(&self) -> Result<bool, JobError>;

    /// Whether a ready job succeeded.
    fn succeeded(&self) -> Result<bool, JobError>;

    /// The job's value. Only valid once ready and successful.
    fn value(&self) -> Result<Value, JobError>;

    /// Why a ready job did not succeed, when the remote side said.
    fn failure_info(&self) -> Result<Option<String>, JobError>;

    /// Requests termination. `force` asks for the work to be killed rather
    /// than signalled. Idempotent and best-effort.
    fn cancel(&self, force: bool) -> Result<(), JobError>;
}

/// What a submission produced.
#[derive(Debug)]
pub enum Submission {
    /// The client ran the job in-process and has its value already.
    Immediate(Value),
    /// The job runs elsewhere; poll the handle.
    Pending(Box<dyn JobHandle>),
}

/// How a client executes jobs, declared up front.
///
/// Only [`Offline`](Self::Offline) and [`Synchronous`](Self::Synchronous)
/// clients may return [`Submission::Immediate`]. An immediate value from a
/// [`Remote`](Self::Remote) client is a contract violation and is reported
/// as a failure, so timeout handling is never skipped by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Deterministic stand-ins for tests and local runs.
    Offline,
    /// A real backend that completes inside `submit`.
    Synchronous,
    /// Work is queued on a separate lane and polled.
    Remote,
}

impl DispatchMode {
    pub fn allows_immediate(&self) -> bool {
        matches!(self, Self::Offline | Self::Synchronous)
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => f.write_str("offline"),
            Self::Synchronous => f.write_str("synchronous"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Submits jobs.
pub trait JobClient: Send + Sync {
    fn mode(&self) -> DispatchMode;

    /// Enqueues `request`. Never fails; problems surface through the handle.
    fn submit(&self, request: &JobRequest) -> Submission;
}

/// Picks the client for the configured mode.
///
/// With `offline` set every submission goes to an [`OfflineClient`];
/// otherwise `remote` is used.
pub fn client_from_config(config: &GpuConfig, remote: Arc<dyn JobClient>) -> Arc<dyn JobClient> {
    if config.offline {
        tracing::info!("offline mode: GPU jobs run against same-process stand-ins");
        Arc::new(OfflineClient::new())
    } else {
        remote
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobArgs, JobKind};

    #[test]
    fn only_remote_mode_rejects_immediate_values() {
        assert!(DispatchMode::Offline.allows_immediate());
        assert!(DispatchMode::Synchronous.allows_immediate());
        assert!(!DispatchMode::Remote.allows_immediate());
    }

    #[test]
    fn offline_config_overrides_remote_client() {
        let remote: Arc<dyn JobClient> =
            Arc::new(LaneClient::new("gpu").expect("lane runtime"));
        let config = GpuConfig {
            offline: true,
            ..GpuConfig::default()
        };
        let client = client_from_config(&config, remote.clone());
        assert_eq!(client.mode(), DispatchMode::Offline);
        let submission = client.submit(&JobKind::Temberture.request(JobArgs::temberture("MKT")));
        assert!(matches!(submission, Submission::Immediate(_)));

        let client = client_from_config(&GpuConfig::default(), remote);
        assert_eq!(client.mode(), DispatchMode::Remote);
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
