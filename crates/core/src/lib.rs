//! `jobflow-core`: job lifecycle building blocks.
//!
//! This crate contains the **pure** parts of the pipeline (no IO, no async):
//! identifiers, the per-job state machine, backoff computation and the
//! handler outcome type.

pub mod backoff;
pub mod error;
pub mod id;
pub mod job;
pub mod outcome;

pub use backoff::{BackoffKind, BackoffPolicy, JobOptions};
pub use error::{LifecycleError, LifecycleResult};
pub use id::{CorrelationId, JobId};
pub use job::{Job, JobAttemptRecord, JobState, NewJob, DEFAULT_JOB_NAME};
pub use outcome::{AttemptOutcome, Disposition, JobOutcome};
