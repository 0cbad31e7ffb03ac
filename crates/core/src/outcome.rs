//! Handler outcomes and the engine's decision derived from them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome a handler reports for one execution.
///
/// Handlers never signal retries by failing loudly; they say what happened and
/// the engine decides whether to redeliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "error", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Work finished.
    Success,
    /// Transient failure; retry while attempts remain.
    RetryableFailure(String),
    /// Permanent failure; never retry.
    TerminalFailure(String),
}

impl JobOutcome {
    pub fn retryable(error: impl core::fmt::Display) -> Self {
        Self::RetryableFailure(error.to_string())
    }

    pub fn terminal(error: impl core::fmt::Display) -> Self {
        Self::TerminalFailure(error.to_string())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobOutcome::Success => None,
            JobOutcome::RetryableFailure(e) | JobOutcome::TerminalFailure(e) => Some(e),
        }
    }

    pub fn classify(&self) -> AttemptOutcome {
        match self {
            JobOutcome::Success => AttemptOutcome::Success,
            JobOutcome::RetryableFailure(_) => AttemptOutcome::RetryableFailure,
            JobOutcome::TerminalFailure(_) => AttemptOutcome::TerminalFailure,
        }
    }

    /// Value of the `status` label on processing metrics.
    pub fn status_label(&self) -> &'static str {
        if self.is_success() { "success" } else { "error" }
    }
}

/// How an attempt ended, as kept in a job's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    TerminalFailure,
}

/// What happens to a job after an attempt has been classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Terminal success.
    Completed,
    /// Redeliver after `delay`.
    Retry { delay: Duration },
    /// Terminal failure.
    Failed { reason: String },
}

impl Disposition {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Disposition::Retry { .. })
    }
}
