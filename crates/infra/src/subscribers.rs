//! Event bus consumers: metrics recording and lifecycle logging.

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jobflow_events::{JobEvent, Subscription};
use jobflow_observability::Telemetry;

/// Generic subscriber loop.
///
/// - Applies `handler` to each message in publish order
/// - Handler errors are logged and never stop the loop
/// - Ends when the bus is dropped
pub fn spawn_subscriber<M, H, E>(
    name: &'static str,
    mut subscription: Subscription<M>,
    mut handler: H,
) -> JoinHandle<()>
where
    M: Send + 'static,
    H: FnMut(M) -> Result<(), E> + Send + 'static,
    E: core::fmt::Debug + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(msg) = subscription.recv().await {
            if let Err(err) = handler(msg) {
                warn!(subscriber = name, error = ?err, "event subscriber handler failed");
            }
        }
        debug!(subscriber = name, "event subscriber stopped");
    })
}

/// Record `jobs_processed_total` and `job_processing_duration_seconds` for
/// every finished attempt.
pub fn spawn_telemetry_subscriber(
    telemetry: Telemetry,
    subscription: Subscription<JobEvent>,
) -> JoinHandle<()> {
    spawn_subscriber("telemetry", subscription, move |event: JobEvent| {
        record_job_event(&telemetry, &event);
        Ok::<_, std::convert::Infallible>(())
    })
}

fn record_job_event(telemetry: &Telemetry, event: &JobEvent) {
    let status = match event {
        JobEvent::Completed { .. } => "success",
        JobEvent::Retrying { .. } | JobEvent::Failed { .. } => "error",
        _ => return,
    };
    if let (Some(job), Some(duration)) = (event.job(), event.duration()) {
        telemetry.record_job(&job.name, status, duration);
    }
}

/// Log queue-level outcomes.
pub fn spawn_log_subscriber(subscription: Subscription<JobEvent>) -> JoinHandle<()> {
    spawn_subscriber("log", subscription, |event: JobEvent| {
        log_job_event(&event);
        Ok::<_, std::convert::Infallible>(())
    })
}

fn log_job_event(event: &JobEvent) {
    match event {
        JobEvent::Completed { job, .. } => info!(
            job_id = %job.job_id,
            correlation_id = %job.correlation_id,
            attempts = job.attempt,
            "Job completed"
        ),
        JobEvent::Failed { job, error, .. } => error!(
            job_id = %job.job_id,
            correlation_id = %job.correlation_id,
            attempts = job.attempt,
            error = %error,
            "Job failed after all retries"
        ),
        JobEvent::QueueError {
            correlation_id,
            error,
            ..
        } => error!(
            correlation_id = correlation_id.as_ref().map(|c| c.as_str()),
            error = %error,
            "Queue error"
        ),
        JobEvent::EnqueueFailed {
            correlation_id,
            error,
            ..
        } => error!(correlation_id = %correlation_id, error = %error, "Queue error"),
        JobEvent::Discarded { job, reason, .. } => warn!(
            job_id = %job.job_id,
            correlation_id = %job.correlation_id,
            attempts = job.attempt,
            reason = %reason,
            "Job delivery discarded"
        ),
        JobEvent::Started { .. } | JobEvent::Retrying { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jobflow_core::{CorrelationId, Job, JobId, NewJob};
    use jobflow_events::{EventBus, InMemoryEventBus};

    use super::*;

    fn job() -> Job {
        let mut job = Job::from_new(
            JobId::new(1),
            NewJob::new(serde_json::json!({}), CorrelationId::from("c")),
        );
        job.attempts_made = 1;
        job
    }

    #[tokio::test]
    async fn telemetry_counts_finished_attempts_by_status() {
        let bus = InMemoryEventBus::<JobEvent>::new();
        let telemetry = Telemetry::new("worker-service").unwrap();
        let task = spawn_telemetry_subscriber(telemetry.clone(), bus.subscribe());

        let j = job();
        bus.publish(JobEvent::started(&j)).unwrap();
        bus.publish(JobEvent::retrying(&j, Duration::from_millis(3), "x", Duration::from_secs(2))).unwrap();
        bus.publish(JobEvent::failed(&j, Duration::from_millis(3), "x")).unwrap();
        bus.publish(JobEvent::completed(&j, Duration::from_millis(3))).unwrap();
        bus.publish(JobEvent::queue_error(None, "down")).unwrap();
        drop(bus);
        task.await.unwrap();

        assert_eq!(telemetry.jobs_processed("process-job", "error"), 2);
        assert_eq!(telemetry.jobs_processed("process-job", "success"), 1);
    }

    #[tokio::test]
    async fn handler_errors_do_not_stop_the_loop() {
        let bus = InMemoryEventBus::<u32>::new();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let task = spawn_subscriber("test", bus.subscribe(), move |n: u32| {
            sink.lock().unwrap().push(n);
            if n % 2 == 0 { Err("even") } else { Ok(()) }
        });

        for n in 1..=4 {
            bus.publish(n).unwrap();
        }
        drop(bus);
        task.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }
}
