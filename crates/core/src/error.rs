//! Lifecycle error model.

use thiserror::Error;

use crate::id::JobId;
use crate::job::JobState;

/// Result type used by the job state machine.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Lifecycle-level error.
///
/// Only deterministic state-machine failures live here. Broker and transport
/// errors belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// A transition was requested from a state that does not allow it.
    #[error("job {job_id}: illegal transition {from} -> {to}")]
    IllegalTransition {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },

    /// The job was delivered again after using up its attempts.
    #[error("job {job_id}: attempts exhausted ({attempts_made}/{max_attempts})")]
    AttemptsExhausted {
        job_id: JobId,
        attempts_made: u32,
        max_attempts: u32,
    },

    /// Job options failed validation.
    #[error("invalid job options: {0}")]
    InvalidOptions(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl LifecycleError {
    pub fn illegal(job_id: JobId, from: JobState, to: JobState) -> Self {
        Self::IllegalTransition { job_id, from, to }
    }

    pub fn invalid_options(msg: impl Into<String>) -> Self {
        Self::InvalidOptions(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
