//! Core value types: the result envelope, its status, and job requests.

pub mod request;
pub mod result;
pub mod status;

pub use request::{JobArgs, JobKind, JobRequest};
pub use result::{ExecutionResult, StageNote};
pub use status::ExecutionStatus;
