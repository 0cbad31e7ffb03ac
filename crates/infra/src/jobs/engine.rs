//! Job lifecycle engine.
//!
//! Polls the broker, runs each delivery through the handler and settles the
//! outcome:
//!
//! - `Success` finalizes the job as completed
//! - a retryable failure with attempts left is re-enqueued after its backoff
//! - anything else finalizes the job as failed
//!
//! Every step is published on the event bus; health, telemetry and logging
//! subscribe there.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use jobflow_core::{Disposition, Job, JobId, JobOutcome};
use jobflow_events::{EventBus, JobEvent};

use super::handler::JobHandler;
use crate::broker::{BrokerError, QueueBroker};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct JobEngineConfig {
    /// Name for logging
    pub name: String,
    /// Maximum concurrent executions
    pub concurrency: usize,
    /// How long to wait before polling again when the queue is empty
    pub poll_interval: Duration,
    /// Upper bound on waiting for in-flight jobs at shutdown
    pub drain_timeout: Duration,
}

impl Default for JobEngineConfig {
    fn default() -> Self {
        Self {
            name: "job-engine".to_string(),
            concurrency: 4,
            poll_interval: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl JobEngineConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("drain timed out after {timeout:?} with {in_flight} job(s) still running")]
    DrainTimeout { timeout: Duration, in_flight: usize },

    #[error("engine loop terminated abnormally: {0}")]
    Join(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Engine runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EngineStats {
    pub jobs_started: u64,
    pub jobs_completed: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub duplicates_skipped: u64,
    pub current_running: usize,
}

/// Handle to control a running engine.
pub struct JobEngineHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    drain_timeout: Duration,
    broker: Arc<dyn QueueBroker>,
    stats: Arc<Mutex<EngineStats>>,
}

impl std::fmt::Debug for JobEngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEngineHandle")
            .field("concurrency", &self.concurrency)
            .field("drain_timeout", &self.drain_timeout)
            .finish_non_exhaustive()
    }
}

impl JobEngineHandle {
    /// Current engine statistics.
    pub fn stats(&self) -> EngineStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop dequeuing, drain in-flight jobs within the configured timeout,
    /// then close the broker.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        let timeout = self.drain_timeout;
        self.shutdown_within(timeout).await
    }

    /// Like [`JobEngineHandle::shutdown`] with an explicit drain bound.
    pub async fn shutdown_within(mut self, timeout: Duration) -> Result<(), EngineError> {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            join.await.map_err(|e| EngineError::Join(e.to_string()))?;
        }

        // Every running job holds one permit until it settles.
        let all = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        let acquired = tokio::time::timeout(timeout, self.permits.acquire_many(all)).await;
        let drained = match acquired {
            Ok(_) => Ok(()),
            Err(_) => Err(EngineError::DrainTimeout {
                timeout,
                in_flight: self
                    .concurrency
                    .saturating_sub(self.permits.available_permits()),
            }),
        };

        self.broker.close().await?;
        drained
    }
}

struct Inner<B> {
    broker: Arc<dyn QueueBroker>,
    handler: Arc<dyn JobHandler>,
    events: B,
    in_flight: Mutex<HashSet<JobId>>,
    stats: Arc<Mutex<EngineStats>>,
}

/// Releases a job id from the in-flight set when the execution ends.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<JobId>>,
    id: JobId,
}

impl<'a> InFlightGuard<'a> {
    fn claim(set: &'a Mutex<HashSet<JobId>>, id: JobId) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        inserted.then_some(Self { set, id })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Background job engine.
pub struct JobEngine<B> {
    inner: Arc<Inner<B>>,
}

impl<B> JobEngine<B>
where
    B: EventBus<JobEvent> + 'static,
{
    pub fn new(broker: Arc<dyn QueueBroker>, handler: Arc<dyn JobHandler>, events: B) -> Self {
        Self {
            inner: Arc::new(Inner {
                broker,
                handler,
                events,
                in_flight: Mutex::new(HashSet::new()),
                stats: Arc::new(Mutex::new(EngineStats::default())),
            }),
        }
    }

    /// Spawn the engine loop on the current runtime.
    pub fn spawn(self, config: JobEngineConfig) -> JobEngineHandle {
        let concurrency = config.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let span = info_span!("engine", service = %config.name);
        let join = tokio::spawn(
            engine_loop(self.inner.clone(), config.clone(), permits.clone(), shutdown_rx)
                .instrument(span),
        );

        JobEngineHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            permits,
            concurrency,
            drain_timeout: config.drain_timeout,
            broker: self.inner.broker.clone(),
            stats: self.inner.stats.clone(),
        }
    }

    /// Run a single delivery to completion (for tests or synchronous use).
    pub async fn process(&self, job: Job) {
        run_job(self.inner.clone(), job).await;
    }
}

async fn engine_loop<B>(
    inner: Arc<Inner<B>>,
    config: JobEngineConfig,
    permits: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
) where
    B: EventBus<JobEvent> + 'static,
{
    info!(concurrency = config.concurrency, "job engine started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        // Wait for a free slot before taking a job off the queue.
        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        match inner.broker.dequeue().await {
            Ok(Some(job)) => {
                debug!(job_id = %job.id, correlation_id = %job.correlation_id, "claimed job");
                let inner = inner.clone();
                tokio::spawn(
                    async move {
                        run_job(inner, job).await;
                        drop(permit);
                    }
                    .in_current_span(),
                );
                continue;
            }
            Ok(None) => drop(permit),
            Err(err) => {
                drop(permit);
                error!(error = %err, "failed to dequeue job");
                inner.publish(JobEvent::queue_error(None, &err));
            }
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
    }

    info!("job engine stopped");
}

async fn run_job<B>(inner: Arc<Inner<B>>, mut job: Job)
where
    B: EventBus<JobEvent> + 'static,
{
    let Some(guard) = InFlightGuard::claim(&inner.in_flight, job.id) else {
        warn!(
            job_id = %job.id,
            correlation_id = %job.correlation_id,
            "duplicate delivery of a running job; skipping"
        );
        inner.update_stats(|s| s.duplicates_skipped += 1);
        inner.discard(&job, "duplicate delivery of a running job").await;
        return;
    };

    if let Err(err) = job.activate() {
        warn!(
            job_id = %job.id,
            correlation_id = %job.correlation_id,
            attempts = job.attempts_made,
            error = %err,
            "dropping undeliverable job"
        );
        inner.discard(&job, err.to_string()).await;
        return;
    }

    info!(
        job_id = %job.id,
        correlation_id = %job.correlation_id,
        attempts = job.current_attempt(),
        "Processing job"
    );
    inner.update_stats(|s| {
        s.jobs_started += 1;
        s.current_running += 1;
    });
    inner.publish(JobEvent::started(&job));

    let started_at = Utc::now();
    let clock = Instant::now();
    let outcome = inner.invoke(job.clone()).await;
    let duration = clock.elapsed();

    inner.update_stats(|s| s.current_running = s.current_running.saturating_sub(1));

    let disposition = match job.settle(&outcome, started_at) {
        Ok(disposition) => disposition,
        Err(err) => {
            error!(job_id = %job.id, correlation_id = %job.correlation_id, error = %err, "failed to settle job");
            return;
        }
    };

    match disposition {
        Disposition::Completed => {
            info!(
                job_id = %job.id,
                correlation_id = %job.correlation_id,
                attempts = job.attempts_made,
                duration_ms = duration.as_millis() as u64,
                "Job completed successfully"
            );
            inner.update_stats(|s| s.jobs_completed += 1);
            inner.finalize(&job).await;
            inner.publish(JobEvent::completed(&job, duration));
        }
        Disposition::Retry { delay } => {
            let error = outcome.error().unwrap_or_default().to_string();
            warn!(
                job_id = %job.id,
                correlation_id = %job.correlation_id,
                attempts = job.attempts_made,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Job processing failed; retry scheduled"
            );
            inner.update_stats(|s| s.jobs_retried += 1);
            inner.publish(JobEvent::retrying(&job, duration, error, delay));

            if let Err(err) = job.mark_waiting() {
                error!(job_id = %job.id, correlation_id = %job.correlation_id, error = %err, "failed to reset job for retry");
                return;
            }
            // The redelivery may be dequeued before requeue returns.
            drop(guard);
            let correlation_id = job.correlation_id.clone();
            if let Err(err) = inner.broker.requeue(job, delay).await {
                error!(correlation_id = %correlation_id, error = %err, "failed to requeue job");
                inner.publish(JobEvent::queue_error(Some(correlation_id), &err));
            }
        }
        Disposition::Failed { reason } => {
            error!(
                job_id = %job.id,
                correlation_id = %job.correlation_id,
                attempts = job.attempts_made,
                error = %reason,
                "Job processing failed"
            );
            inner.update_stats(|s| s.jobs_failed += 1);
            inner.finalize(&job).await;
            inner.publish(JobEvent::failed(&job, duration, reason));
        }
    }
}

impl<B> Inner<B>
where
    B: EventBus<JobEvent> + 'static,
{
    /// Run the handler in its own task so a panic is contained to this job.
    async fn invoke(&self, job: Job) -> JobOutcome {
        let handler = self.handler.clone();
        match tokio::spawn(async move { handler.handle(job).await }).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => {
                let panic = err.into_panic();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                JobOutcome::retryable(format!("job handler panicked: {message}"))
            }
            Err(err) => JobOutcome::retryable(format!("job handler was cancelled: {err}")),
        }
    }

    async fn discard(&self, job: &Job, reason: impl Into<String>) {
        if let Err(err) = self.broker.discard(job).await {
            error!(job_id = %job.id, correlation_id = %job.correlation_id, error = %err, "failed to discard job delivery");
            self.publish(JobEvent::queue_error(Some(job.correlation_id.clone()), &err));
        }
        self.publish(JobEvent::discarded(job, reason));
    }

    async fn finalize(&self, job: &Job) {
        if let Err(err) = self.broker.finalize(job).await {
            error!(job_id = %job.id, correlation_id = %job.correlation_id, error = %err, "failed to finalize job");
            self.publish(JobEvent::queue_error(Some(job.correlation_id.clone()), &err));
        }
    }

    fn publish(&self, event: JobEvent) {
        if let Err(err) = self.events.publish(event) {
            warn!(error = ?err, "failed to publish job event");
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut EngineStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use jobflow_core::{BackoffPolicy, CorrelationId, JobOptions, JobState, NewJob};
    use jobflow_events::{InMemoryEventBus, Subscription};

    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::jobs::handler_fn;

    type Bus = Arc<InMemoryEventBus<JobEvent>>;

    fn config() -> JobEngineConfig {
        JobEngineConfig::default()
            .with_name("test-engine")
            .with_poll_interval(Duration::from_millis(5))
            .with_drain_timeout(Duration::from_secs(2))
    }

    fn new_job(payload: serde_json::Value, base_delay_ms: u64) -> NewJob {
        NewJob::new(payload, CorrelationId::from("corr-test")).with_options(JobOptions {
            max_attempts: 3,
            backoff: BackoffPolicy::exponential(Duration::from_millis(base_delay_ms)),
        })
    }

    fn engine(broker: &Arc<InMemoryBroker>, handler: impl JobHandler, bus: &Bus) -> JobEngine<Bus> {
        JobEngine::new(broker.clone(), Arc::new(handler), bus.clone())
    }

    /// Collect events until `stop` matches one, or panic after two seconds.
    async fn events_until(sub: &mut Subscription<JobEvent>, mut stop: impl FnMut(&JobEvent) -> bool) -> Vec<JobEvent> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let ev = tokio::time::timeout_at(deadline, sub.recv())
                .await
                .expect("timed out waiting for event")
                .expect("bus closed");
            let done = stop(&ev);
            seen.push(ev);
            if done {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn successful_job_completes_on_first_attempt() {
        let broker = Arc::new(InMemoryBroker::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();

        let id = broker.enqueue(new_job(serde_json::json!({"foo": 1}), 10)).await.unwrap();
        let handle = engine(&broker, handler_fn(|_job: Job| async { JobOutcome::Success }), &bus).spawn(config());

        let events = events_until(&mut sub, |e| matches!(e, JobEvent::Completed { .. })).await;
        let kinds: Vec<_> = events.iter().map(JobEvent::kind).collect();
        assert_eq!(kinds, ["started", "completed"]);
        assert_eq!(events[1].correlation_id().unwrap().as_str(), "corr-test");

        let job = broker.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts_made, 1);

        assert_eq!(handle.stats().jobs_completed, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn always_failing_job_is_retried_with_backoff_then_failed() {
        let broker = Arc::new(InMemoryBroker::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));

        let id = broker.enqueue(new_job(serde_json::json!({"foo": 1}), 20)).await.unwrap();
        let counter = calls.clone();
        let handler = handler_fn(move |_job: Job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                JobOutcome::retryable("Simulated job failure")
            }
        });
        let handle = engine(&broker, handler, &bus).spawn(config());

        let events = events_until(&mut sub, |e| matches!(e, JobEvent::Failed { .. })).await;

        let delays: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Retrying { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect();
        assert_eq!(delays, [Duration::from_millis(20), Duration::from_millis(40)]);

        let attempts: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, JobEvent::Started { .. }))
            .map(|e| e.job().unwrap().attempt)
            .collect();
        assert_eq!(attempts, [1, 2, 3]);

        // Give a would-be fourth attempt time to show up.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let job = broker.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts_made, 3);
        assert_eq!(job.history.len(), 3);
        assert_eq!(job.failed_reason.as_deref(), Some("Simulated job failure"));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn terminal_failure_is_not_retried() {
        let broker = Arc::new(InMemoryBroker::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();

        let id = broker.enqueue(new_job(serde_json::json!({}), 10)).await.unwrap();
        let handler = handler_fn(|_job: Job| async { JobOutcome::terminal("invalid payload") });
        let handle = engine(&broker, handler, &bus).spawn(config());

        let events = events_until(&mut sub, |e| matches!(e, JobEvent::Failed { .. })).await;
        assert!(!events.iter().any(|e| matches!(e, JobEvent::Retrying { .. })));
        assert_eq!(broker.get(id).await.unwrap().unwrap().attempts_made, 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn handler_panic_is_classified_as_retryable() {
        let broker = Arc::new(InMemoryBroker::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();

        broker.enqueue(new_job(serde_json::json!({}), 10)).await.unwrap();
        let handler = handler_fn(|job: Job| async move {
            if job.attempts_made == 0 {
                panic!("boom");
            }
            JobOutcome::Success
        });
        let handle = engine(&broker, handler, &bus).spawn(config());

        let events = events_until(&mut sub, |e| matches!(e, JobEvent::Completed { .. })).await;
        let error = events
            .iter()
            .find_map(|e| match e {
                JobEvent::Retrying { error, .. } => Some(error.clone()),
                _ => None,
            })
            .unwrap();
        assert!(error.contains("panicked"), "{error}");

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn in_flight_executions_respect_concurrency() {
        let broker = Arc::new(InMemoryBroker::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            broker.enqueue(new_job(serde_json::json!({}), 10)).await.unwrap();
        }

        let (r, p) = (running.clone(), peak.clone());
        let handler = handler_fn(move |_job: Job| {
            let (running, peak) = (r.clone(), p.clone());
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                JobOutcome::Success
            }
        });
        let handle = engine(&broker, handler, &bus).spawn(config().with_concurrency(2));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while handle.stats().jobs_completed < 8 {
            assert!(tokio::time::Instant::now() < deadline, "jobs did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_delivery_of_a_running_job_is_skipped() {
        let broker = Arc::new(InMemoryBroker::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let calls = Arc::new(AtomicUsize::new(0));

        broker.enqueue(new_job(serde_json::json!({}), 10)).await.unwrap();
        let job = broker.dequeue().await.unwrap().unwrap();

        let counter = calls.clone();
        let handler = handler_fn(move |_job: Job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                JobOutcome::Success
            }
        });
        let mut sub = bus.subscribe();
        let engine = engine(&broker, handler, &bus);

        tokio::join!(engine.process(job.clone()), engine.process(job));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.inner.stats.lock().unwrap().duplicates_skipped, 1);

        let mut kinds = Vec::new();
        while let Ok(ev) = sub.try_recv() {
            kinds.push(ev.kind());
        }
        assert!(kinds.contains(&"discarded"), "{kinds:?}");
    }

    /// In-memory broker that counts discards and can stall after a requeue
    /// has already made the job deliverable.
    struct StallingBroker {
        inner: InMemoryBroker,
        requeue_stall: Duration,
        discards: AtomicUsize,
    }

    impl StallingBroker {
        fn new(requeue_stall: Duration) -> Self {
            Self {
                inner: InMemoryBroker::new(),
                requeue_stall,
                discards: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl QueueBroker for StallingBroker {
        async fn enqueue(&self, job: NewJob) -> crate::broker::BrokerResult<JobId> {
            self.inner.enqueue(job).await
        }

        async fn requeue(&self, job: Job, delay: Duration) -> crate::broker::BrokerResult<()> {
            self.inner.requeue(job, delay).await?;
            tokio::time::sleep(self.requeue_stall).await;
            Ok(())
        }

        async fn dequeue(&self) -> crate::broker::BrokerResult<Option<Job>> {
            self.inner.dequeue().await
        }

        async fn discard(&self, job: &Job) -> crate::broker::BrokerResult<()> {
            self.discards.fetch_add(1, Ordering::SeqCst);
            self.inner.discard(job).await
        }

        async fn finalize(&self, job: &Job) -> crate::broker::BrokerResult<()> {
            self.inner.finalize(job).await
        }

        async fn get(&self, id: JobId) -> crate::broker::BrokerResult<Option<Job>> {
            self.inner.get(id).await
        }

        async fn queue_depth(&self) -> crate::broker::BrokerResult<u64> {
            self.inner.queue_depth().await
        }

        async fn close(&self) -> crate::broker::BrokerResult<()> {
            self.inner.close().await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn immediate_retry_is_redelivered_while_requeue_is_in_flight() {
        let broker = Arc::new(StallingBroker::new(Duration::from_millis(30)));
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));

        let id = broker
            .enqueue(
                NewJob::new(serde_json::json!({}), CorrelationId::from("corr-test")).with_options(JobOptions {
                    max_attempts: 3,
                    backoff: BackoffPolicy::fixed(Duration::ZERO),
                }),
            )
            .await
            .unwrap();

        let counter = calls.clone();
        let handler = handler_fn(move |_job: Job| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    JobOutcome::retryable("first attempt fails")
                } else {
                    JobOutcome::Success
                }
            }
        });
        let handle = JobEngine::new(broker.clone(), Arc::new(handler), bus.clone())
            .spawn(config().with_concurrency(2));

        events_until(&mut sub, |e| matches!(e, JobEvent::Completed { .. })).await;

        let job = broker.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts_made, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.stats().duplicates_skipped, 0);
        assert_eq!(broker.discards.load(Ordering::SeqCst), 0);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_delivery_is_discarded_without_running() {
        let broker = Arc::new(StallingBroker::new(Duration::ZERO));
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));

        broker.enqueue(new_job(serde_json::json!({}), 10)).await.unwrap();
        let mut job = broker.dequeue().await.unwrap().unwrap();
        job.attempts_made = job.max_attempts();

        let counter = calls.clone();
        let handler = handler_fn(move |_job: Job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                JobOutcome::Success
            }
        });
        let engine = JobEngine::new(broker.clone(), Arc::new(handler), bus.clone());
        engine.process(job).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(broker.discards.load(Ordering::SeqCst), 1);
        let ev = sub.try_recv().unwrap();
        assert_eq!(ev.kind(), "discarded");
        assert_eq!(ev.correlation_id().unwrap().as_str(), "corr-test");
    }

    /// Run one succeeding and one failing job side by side; the slower one
    /// finishes last and decides the final health signal.
    async fn race_outcomes(success_ms: u64, failure_ms: u64) -> crate::health::HealthSnapshot {
        let broker = Arc::new(InMemoryBroker::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let health = crate::health::HealthTracker::new();
        health.spawn_listener(bus.subscribe());
        let mut sub = bus.subscribe();

        broker
            .enqueue(new_job(serde_json::json!({"ok": true, "ms": success_ms}), 10))
            .await
            .unwrap();
        broker
            .enqueue(new_job(serde_json::json!({"ok": false, "ms": failure_ms}), 10))
            .await
            .unwrap();

        let handler = handler_fn(|job: Job| async move {
            let ms = job.payload["ms"].as_u64().unwrap_or_default();
            tokio::time::sleep(Duration::from_millis(ms)).await;
            if job.payload["ok"] == true {
                JobOutcome::Success
            } else {
                JobOutcome::terminal("bad payload")
            }
        });
        let handle = engine(&broker, handler, &bus).spawn(config().with_concurrency(2));

        let mut terminal = 0;
        events_until(&mut sub, |e| {
            if matches!(e, JobEvent::Completed { .. } | JobEvent::Failed { .. }) {
                terminal += 1;
            }
            terminal == 2
        })
        .await;
        handle.shutdown().await.unwrap();

        // The listener applies events in publish order; wait for it to catch up.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let snapshot = health.snapshot();
            let settled = snapshot.last_processed_at.is_some()
                && snapshot.is_healthy == (success_ms > failure_ms);
            if settled || tokio::time::Instant::now() >= deadline {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn concurrent_outcomes_leave_health_at_the_last_one() {
        let snapshot = race_outcomes(5, 60).await;
        assert!(!snapshot.is_healthy);
        assert!(snapshot.last_processed_at.is_some());

        let snapshot = race_outcomes(60, 5).await;
        assert!(snapshot.is_healthy);
        assert!(snapshot.last_processed_at.is_some());
    }

    #[tokio::test]
    async fn broker_outage_is_published_as_queue_error() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_available(false);
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();

        let handle = engine(&broker, handler_fn(|_job: Job| async { JobOutcome::Success }), &bus).spawn(config());

        let events = events_until(&mut sub, |e| matches!(e, JobEvent::QueueError { .. })).await;
        assert_eq!(events.last().unwrap().correlation_id(), None);

        broker.set_available(true);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_jobs() {
        let broker = Arc::new(InMemoryBroker::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();

        broker.enqueue(new_job(serde_json::json!({}), 10)).await.unwrap();
        let handler = handler_fn(|_job: Job| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            JobOutcome::Success
        });
        let handle = engine(&broker, handler, &bus).spawn(config());

        events_until(&mut sub, |e| matches!(e, JobEvent::Started { .. })).await;
        handle.shutdown().await.unwrap();

        let ev = sub.try_recv().unwrap();
        assert!(matches!(ev, JobEvent::Completed { .. }));
        assert!(broker.dequeue().await.is_err());
    }

    #[tokio::test]
    async fn shutdown_reports_drain_timeout() {
        let broker = Arc::new(InMemoryBroker::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut sub = bus.subscribe();

        broker.enqueue(new_job(serde_json::json!({}), 10)).await.unwrap();
        let handler = handler_fn(|_job: Job| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            JobOutcome::Success
        });
        let handle = engine(&broker, handler, &bus).spawn(config());

        events_until(&mut sub, |e| matches!(e, JobEvent::Started { .. })).await;
        let err = handle.shutdown_within(Duration::from_millis(20)).await.unwrap_err();

        assert!(matches!(err, EngineError::DrainTimeout { in_flight: 1, .. }));
    }
}
