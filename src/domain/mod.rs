//! Domain types for the shared job-state record.
//!
//! [`JobStateRecord`] tracks every GPU job dispatched for one workflow
//! instance. It is physically shared by all coordinators of that workflow,
//! so it is only ever mutated through
//! [`JobStateStore`](crate::store::job_state::JobStateStore), under the
//! job-state guard.

pub mod record;

pub use record::*;
