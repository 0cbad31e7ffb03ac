//! Job submission: correlation id assignment and hand-off to the broker.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use jobflow_core::{CorrelationId, JobId, JobOptions, NewJob};
use jobflow_events::{EventBus, JobEvent};

use crate::broker::{BrokerError, QueueBroker};
use crate::health::HealthTracker;

/// An accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub job_id: JobId,
    pub correlation_id: CorrelationId,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The broker did not accept the job; nothing was created.
    #[error("queue unavailable: {source}")]
    QueueConnectivity {
        correlation_id: CorrelationId,
        #[source]
        source: BrokerError,
    },
}

impl SubmitError {
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            SubmitError::QueueConnectivity { correlation_id, .. } => correlation_id,
        }
    }
}

/// Accepts job submissions and enqueues them with the configured options.
pub struct JobSubmissionGateway<B> {
    broker: Arc<dyn QueueBroker>,
    health: HealthTracker,
    events: B,
    options: JobOptions,
}

impl<B> JobSubmissionGateway<B>
where
    B: EventBus<JobEvent>,
{
    pub fn new(broker: Arc<dyn QueueBroker>, health: HealthTracker, events: B) -> Self {
        Self {
            broker,
            health,
            events,
            options: JobOptions::default(),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    /// Enqueue `payload`. A missing or blank correlation id is generated.
    ///
    /// Submissions are never deduplicated: the same correlation id twice
    /// yields two jobs.
    pub async fn submit(
        &self,
        payload: serde_json::Value,
        correlation_id: Option<&str>,
    ) -> Result<Submission, SubmitError> {
        let correlation_id = CorrelationId::from_optional(correlation_id);
        let job = NewJob::new(payload, correlation_id.clone()).with_options(self.options);

        match self.broker.enqueue(job).await {
            Ok(job_id) => {
                info!(job_id = %job_id, correlation_id = %correlation_id, "Job queued");
                Ok(Submission {
                    job_id,
                    correlation_id,
                })
            }
            Err(source) => {
                error!(correlation_id = %correlation_id, error = %source, "Failed to queue job");
                self.health.on_failure();
                if let Err(err) = self
                    .events
                    .publish(JobEvent::enqueue_failed(correlation_id.clone(), &source))
                {
                    warn!(error = ?err, "failed to publish job event");
                }
                Err(SubmitError::QueueConnectivity {
                    correlation_id,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use jobflow_core::JobState;
    use jobflow_events::InMemoryEventBus;

    use super::*;
    use crate::broker::InMemoryBroker;

    fn gateway(broker: &Arc<InMemoryBroker>) -> (JobSubmissionGateway<Arc<InMemoryEventBus<JobEvent>>>, HealthTracker, Arc<InMemoryEventBus<JobEvent>>) {
        let health = HealthTracker::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let gw = JobSubmissionGateway::new(broker.clone(), health.clone(), bus.clone());
        (gw, health, bus)
    }

    #[tokio::test]
    async fn submission_keeps_the_callers_correlation_id() {
        let broker = Arc::new(InMemoryBroker::new());
        let (gw, _, _) = gateway(&broker);

        let sub = gw.submit(serde_json::json!({"foo": 1}), Some("abc-123")).await.unwrap();

        assert_eq!(sub.correlation_id.as_str(), "abc-123");
        let job = broker.get(sub.job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts_made, 0);
        assert_eq!(job.correlation_id.as_str(), "abc-123");
        assert_eq!(job.payload, serde_json::json!({"foo": 1}));
        assert_eq!(job.options, JobOptions::default());
    }

    #[tokio::test]
    async fn missing_correlation_id_is_generated() {
        let broker = Arc::new(InMemoryBroker::new());
        let (gw, _, _) = gateway(&broker);

        let a = gw.submit(serde_json::json!({}), None).await.unwrap();
        let b = gw.submit(serde_json::json!({}), Some("  ")).await.unwrap();

        assert!(!a.correlation_id.as_str().is_empty());
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[tokio::test]
    async fn same_correlation_id_twice_creates_two_jobs() {
        let broker = Arc::new(InMemoryBroker::new());
        let (gw, _, _) = gateway(&broker);

        let a = gw.submit(serde_json::json!({}), Some("dup")).await.unwrap();
        let b = gw.submit(serde_json::json!({}), Some("dup")).await.unwrap();

        assert_ne!(a.job_id, b.job_id);
        assert_eq!(broker.len(), 2);
    }

    #[tokio::test]
    async fn broker_outage_creates_nothing_and_degrades_health() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_available(false);
        let (gw, health, bus) = gateway(&broker);
        let mut events = bus.subscribe();

        let err = gw.submit(serde_json::json!({"foo": 1}), Some("abc-123")).await.unwrap_err();

        assert_eq!(err.correlation_id().as_str(), "abc-123");
        assert!(!health.is_healthy());
        assert!(broker.is_empty());
        let ev = events.try_recv().unwrap();
        assert_eq!(ev.kind(), "enqueue_failed");
        assert_eq!(ev.correlation_id().unwrap().as_str(), "abc-123");
    }
}
