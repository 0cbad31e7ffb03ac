//! In-memory broker for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use jobflow_core::{Job, JobId, JobState, NewJob};

use super::{BrokerError, BrokerResult, QueueBroker};

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    jobs: HashMap<JobId, Job>,
    ready: VecDeque<JobId>,
    /// Delayed redeliveries, kept sorted by due time
    delayed: Vec<(Instant, JobId)>,
}

impl State {
    fn promote_due(&mut self, now: Instant) {
        let due = self.delayed.partition_point(|(at, _)| *at <= now);
        for (_, id) in self.delayed.drain(..due) {
            self.ready.push_back(id);
        }
    }

    fn schedule(&mut self, id: JobId, delay: Duration) {
        if delay.is_zero() {
            self.ready.push_back(id);
            return;
        }
        let at = Instant::now() + delay;
        let pos = self.delayed.partition_point(|(due, _)| *due <= at);
        self.delayed.insert(pos, (at, id));
    }
}

/// Process-local queue.
///
/// - FIFO for ready jobs; delayed jobs join the back of the queue once due
/// - `set_available(false)` simulates a broker outage: every call fails with
///   [`BrokerError::Connectivity`] until it is switched back on
#[derive(Debug)]
pub struct InMemoryBroker {
    state: Mutex<State>,
    available: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of jobs stored in any state.
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> BrokerResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(BrokerError::Connectivity("broker unavailable".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBroker for InMemoryBroker {
    async fn enqueue(&self, job: NewJob) -> BrokerResult<JobId> {
        self.check()?;
        let mut state = self.lock();
        state.next_id += 1;
        let id = JobId::new(state.next_id);
        state.jobs.insert(id, Job::from_new(id, job));
        state.ready.push_back(id);
        Ok(id)
    }

    async fn requeue(&self, job: Job, delay: Duration) -> BrokerResult<()> {
        self.check()?;
        let mut state = self.lock();
        let id = job.id;
        state.jobs.insert(id, job);
        state.schedule(id, delay);
        Ok(())
    }

    async fn dequeue(&self) -> BrokerResult<Option<Job>> {
        self.check()?;
        let mut state = self.lock();
        state.promote_due(Instant::now());

        while let Some(id) = state.ready.pop_front() {
            // Entry without a record: nothing to deliver.
            let Some(stored) = state.jobs.get_mut(&id) else {
                continue;
            };
            let delivered = stored.clone();
            stored.state = JobState::Active;
            stored.updated_at = Utc::now();
            return Ok(Some(delivered));
        }
        Ok(None)
    }

    async fn discard(&self, _job: &Job) -> BrokerResult<()> {
        // Deliveries are not tracked once handed out.
        self.check()
    }

    async fn finalize(&self, job: &Job) -> BrokerResult<()> {
        self.check()?;
        self.lock().jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> BrokerResult<Option<Job>> {
        self.check()?;
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn queue_depth(&self) -> BrokerResult<u64> {
        self.check()?;
        let state = self.lock();
        Ok((state.ready.len() + state.delayed.len()) as u64)
    }

    async fn close(&self) -> BrokerResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
