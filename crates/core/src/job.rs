//! The job record and its lifecycle state machine.
//!
//! ```text
//! Waiting ──activate──► Active ──settle──┬──► Completed
//!    ▲                                   ├──► Failed
//!    └────── mark_waiting ◄── Retrying ◄─┘
//! ```
//!
//! `Completed` and `Failed` are terminal. `attempts_made` counts finished
//! attempts and never exceeds `options.max_attempts`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backoff::JobOptions;
use crate::error::{LifecycleError, LifecycleResult};
use crate::id::{CorrelationId, JobId};
use crate::outcome::{AttemptOutcome, Disposition, JobOutcome};

/// Job type label used for the single queue this pipeline serves.
pub const DEFAULT_JOB_NAME: &str = "process-job";

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Queued (possibly delayed), waiting to be delivered
    Waiting,
    /// Currently being executed
    Active,
    /// Failed, backoff computed, about to be redelivered
    Retrying,
    /// Completed successfully
    Completed,
    /// Exhausted retries or failed permanently
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Retrying => "retrying",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submission that has not been given an id by the broker yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub payload: serde_json::Value,
    pub correlation_id: CorrelationId,
    pub created_at: DateTime<Utc>,
    pub options: JobOptions,
}

impl NewJob {
    pub fn new(payload: serde_json::Value, correlation_id: CorrelationId) -> Self {
        Self {
            name: DEFAULT_JOB_NAME.to_string(),
            payload,
            correlation_id,
            created_at: Utc::now(),
            options: JobOptions::default(),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Record of a finished execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// A unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub payload: serde_json::Value,
    pub correlation_id: CorrelationId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Finished attempts so far
    pub attempts_made: u32,
    pub options: JobOptions,
    pub state: JobState,
    /// Error from the most recent failed attempt
    pub failed_reason: Option<String>,
    pub history: Vec<JobAttemptRecord>,
}

impl Job {
    /// Materialize a submission once the broker has assigned its id.
    pub fn from_new(id: JobId, new: NewJob) -> Self {
        Self {
            id,
            name: new.name,
            payload: new.payload,
            correlation_id: new.correlation_id,
            created_at: new.created_at,
            updated_at: new.created_at,
            attempts_made: 0,
            options: new.options,
            state: JobState::Waiting,
            failed_reason: None,
            history: Vec::new(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.options.max_attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Number of the attempt currently running (or about to run), 1-indexed.
    pub fn current_attempt(&self) -> u32 {
        self.attempts_made + 1
    }

    /// `Waiting -> Active`.
    pub fn activate(&mut self) -> LifecycleResult<()> {
        self.expect_state(JobState::Waiting, JobState::Active)?;
        if self.attempts_made >= self.options.max_attempts {
            return Err(LifecycleError::AttemptsExhausted {
                job_id: self.id,
                attempts_made: self.attempts_made,
                max_attempts: self.options.max_attempts,
            });
        }
        self.state = JobState::Active;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Classify the outcome of the running attempt.
    ///
    /// `Active -> Completed | Retrying | Failed`. Counts the attempt and, for
    /// retries, returns the backoff delay for redelivery.
    pub fn settle(
        &mut self,
        outcome: &JobOutcome,
        started_at: DateTime<Utc>,
    ) -> LifecycleResult<Disposition> {
        if self.state != JobState::Active {
            let to = match outcome {
                JobOutcome::Success => JobState::Completed,
                _ => JobState::Failed,
            };
            return Err(LifecycleError::illegal(self.id, self.state, to));
        }

        let now = Utc::now();
        self.attempts_made += 1;
        self.updated_at = now;
        self.history.push(JobAttemptRecord {
            attempt: self.attempts_made,
            started_at,
            finished_at: now,
            outcome: outcome.classify(),
            error: outcome.error().map(str::to_string),
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });

        let disposition = match outcome {
            JobOutcome::Success => {
                self.state = JobState::Completed;
                Disposition::Completed
            }
            JobOutcome::RetryableFailure(error)
                if self.attempts_made < self.options.max_attempts =>
            {
                self.failed_reason = Some(error.clone());
                self.state = JobState::Retrying;
                Disposition::Retry {
                    delay: self.options.backoff.delay_for_attempt(self.attempts_made),
                }
            }
            JobOutcome::RetryableFailure(error) | JobOutcome::TerminalFailure(error) => {
                self.failed_reason = Some(error.clone());
                self.state = JobState::Failed;
                Disposition::Failed {
                    reason: error.clone(),
                }
            }
        };

        Ok(disposition)
    }

    /// `Retrying -> Waiting`, once the redelivery has been scheduled.
    pub fn mark_waiting(&mut self) -> LifecycleResult<()> {
        self.expect_state(JobState::Retrying, JobState::Waiting)?;
        self.state = JobState::Waiting;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn expect_state(&self, expected: JobState, to: JobState) -> LifecycleResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LifecycleError::illegal(self.id, self.state, to))
        }
    }
}
