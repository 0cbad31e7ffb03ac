//! Outcome events published by the lifecycle engine and the submission path.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use jobflow_core::{CorrelationId, Job, JobId};

/// Identity of the job an event is about, captured at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobContext {
    pub job_id: JobId,
    pub name: String,
    pub correlation_id: CorrelationId,
    /// 1-indexed attempt the event refers to
    pub attempt: u32,
    pub max_attempts: u32,
}

impl JobContext {
    /// Context for the attempt currently running on `job`.
    pub fn running(job: &Job) -> Self {
        Self::at_attempt(job, job.current_attempt())
    }

    /// Context for the most recently finished attempt on `job`.
    pub fn finished(job: &Job) -> Self {
        Self::at_attempt(job, job.attempts_made)
    }

    fn at_attempt(job: &Job, attempt: u32) -> Self {
        Self {
            job_id: job.id,
            name: job.name.clone(),
            correlation_id: job.correlation_id.clone(),
            attempt,
            max_attempts: job.max_attempts(),
        }
    }
}

/// Something that happened to a job, or to the queue connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// `Waiting -> Active`
    Started { job: JobContext, at: DateTime<Utc> },
    /// Terminal success
    Completed {
        job: JobContext,
        duration: Duration,
        at: DateTime<Utc>,
    },
    /// Attempt failed; redelivery scheduled after `delay`
    Retrying {
        job: JobContext,
        duration: Duration,
        error: String,
        delay: Duration,
        at: DateTime<Utc>,
    },
    /// Terminal failure
    Failed {
        job: JobContext,
        duration: Duration,
        error: String,
        at: DateTime<Utc>,
    },
    /// The broker failed while the engine was using it
    QueueError {
        correlation_id: Option<CorrelationId>,
        error: String,
        at: DateTime<Utc>,
    },
    /// A delivery was dropped without running the handler
    Discarded {
        job: JobContext,
        reason: String,
        at: DateTime<Utc>,
    },
    /// A submission could not be enqueued
    EnqueueFailed {
        correlation_id: CorrelationId,
        error: String,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn started(job: &Job) -> Self {
        Self::Started {
            job: JobContext::running(job),
            at: Utc::now(),
        }
    }

    pub fn completed(job: &Job, duration: Duration) -> Self {
        Self::Completed {
            job: JobContext::finished(job),
            duration,
            at: Utc::now(),
        }
    }

    pub fn retrying(job: &Job, duration: Duration, error: impl Into<String>, delay: Duration) -> Self {
        Self::Retrying {
            job: JobContext::finished(job),
            duration,
            error: error.into(),
            delay,
            at: Utc::now(),
        }
    }

    pub fn failed(job: &Job, duration: Duration, error: impl Into<String>) -> Self {
        Self::Failed {
            job: JobContext::finished(job),
            duration,
            error: error.into(),
            at: Utc::now(),
        }
    }

    pub fn discarded(job: &Job, reason: impl Into<String>) -> Self {
        Self::Discarded {
            job: JobContext::running(job),
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    pub fn queue_error(correlation_id: Option<CorrelationId>, error: impl core::fmt::Display) -> Self {
        Self::QueueError {
            correlation_id,
            error: error.to_string(),
            at: Utc::now(),
        }
    }

    pub fn enqueue_failed(correlation_id: CorrelationId, error: impl core::fmt::Display) -> Self {
        Self::EnqueueFailed {
            correlation_id,
            error: error.to_string(),
            at: Utc::now(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Started { .. } => "started",
            JobEvent::Completed { .. } => "completed",
            JobEvent::Retrying { .. } => "retrying",
            JobEvent::Failed { .. } => "failed",
            JobEvent::Discarded { .. } => "discarded",
            JobEvent::QueueError { .. } => "queue_error",
            JobEvent::EnqueueFailed { .. } => "enqueue_failed",
        }
    }

    pub fn job(&self) -> Option<&JobContext> {
        match self {
            JobEvent::Started { job, .. }
            | JobEvent::Completed { job, .. }
            | JobEvent::Retrying { job, .. }
            | JobEvent::Failed { job, .. }
            | JobEvent::Discarded { job, .. } => Some(job),
            JobEvent::QueueError { .. } | JobEvent::EnqueueFailed { .. } => None,
        }
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            JobEvent::QueueError { correlation_id, .. } => correlation_id.as_ref(),
            JobEvent::EnqueueFailed { correlation_id, .. } => Some(correlation_id),
            other => other.job().map(|j| &j.correlation_id),
        }
    }

    /// Execution time for events that close an attempt.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            JobEvent::Completed { duration, .. }
            | JobEvent::Retrying { duration, .. }
            | JobEvent::Failed { duration, .. } => Some(*duration),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use jobflow_core::NewJob;

    use super::*;

    fn job() -> Job {
        let mut job = Job::from_new(
            JobId::new(7),
            NewJob::new(serde_json::json!({}), CorrelationId::from("abc")),
        );
        job.attempts_made = 1;
        job
    }

    #[test]
    fn finished_events_refer_to_the_counted_attempt() {
        let ev = JobEvent::retrying(&job(), Duration::from_millis(5), "boom", Duration::from_secs(2));
        assert_eq!(ev.job().unwrap().attempt, 1);
        assert_eq!(ev.kind(), "retrying");
    }

    #[test]
    fn started_event_refers_to_the_running_attempt() {
        assert_eq!(JobEvent::started(&job()).job().unwrap().attempt, 2);
    }

    #[test]
    fn correlation_id_is_carried_by_every_job_event() {
        let j = job();
        let events = [
            JobEvent::started(&j),
            JobEvent::completed(&j, Duration::ZERO),
            JobEvent::failed(&j, Duration::ZERO, "x"),
            JobEvent::discarded(&j, "duplicate delivery"),
            JobEvent::enqueue_failed(CorrelationId::from("abc"), "down"),
        ];
        for ev in events {
            assert_eq!(ev.correlation_id().map(CorrelationId::as_str), Some("abc"));
        }
        assert_eq!(JobEvent::queue_error(None, "down").correlation_id(), None);
    }
}
