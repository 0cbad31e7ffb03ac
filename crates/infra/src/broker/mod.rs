//! Queue broker boundary.
//!
//! The broker owns durability and delivery: it stores jobs, hands them out
//! at-least-once and redelivers after a delay on request. The engine never
//! assumes exactly-once delivery.
//!
//! ## Implementations
//!
//! - [`InMemoryBroker`]: process-local queue for dev/tests
//! - `RedisBroker` (feature `redis`): durable, shared between worker processes

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use jobflow_core::{Job, JobId, NewJob};

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryBroker;
#[cfg(feature = "redis")]
pub use self::redis::RedisBroker;

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Broker error.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The broker could not be reached (connect, IO, timeout).
    #[error("queue connectivity error: {0}")]
    Connectivity(String),

    /// The broker rejected a command.
    #[error("queue command error: {0}")]
    Command(String),

    /// A stored job could not be encoded/decoded.
    #[error("job serialization error: {0}")]
    Serialization(String),

    /// The broker was closed by this process.
    #[error("queue closed")]
    Closed,
}

impl BrokerError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, BrokerError::Connectivity(_) | BrokerError::Closed)
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

/// Durable multi-consumer queue for a single job type.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Store a new job (`Waiting`, no attempts) and assign its id.
    async fn enqueue(&self, job: NewJob) -> BrokerResult<JobId>;

    /// Store `job` and make it deliverable again after `delay`.
    async fn requeue(&self, job: Job, delay: Duration) -> BrokerResult<()>;

    /// Next ready job, if any. Does not wait.
    ///
    /// The stored record is marked `Active`; the returned copy is the record
    /// as it was waiting, for the engine to activate.
    async fn dequeue(&self) -> BrokerResult<Option<Job>>;

    /// Give up a delivery without running it. The stored record is left as
    /// is and the job is not redelivered.
    async fn discard(&self, job: &Job) -> BrokerResult<()>;

    /// Store a terminal job for audit; it is never delivered again.
    async fn finalize(&self, job: &Job) -> BrokerResult<()>;

    /// Look up a job in any state.
    async fn get(&self, id: JobId) -> BrokerResult<Option<Job>>;

    /// Jobs waiting for delivery, including delayed ones.
    async fn queue_depth(&self) -> BrokerResult<u64>;

    /// Release the broker connection. Later calls fail with [`BrokerError::Closed`].
    async fn close(&self) -> BrokerResult<()>;
}

#[async_trait]
impl<B> QueueBroker for Arc<B>
where
    B: QueueBroker + ?Sized,
{
    async fn enqueue(&self, job: NewJob) -> BrokerResult<JobId> {
        (**self).enqueue(job).await
    }

    async fn requeue(&self, job: Job, delay: Duration) -> BrokerResult<()> {
        (**self).requeue(job, delay).await
    }

    async fn dequeue(&self) -> BrokerResult<Option<Job>> {
        (**self).dequeue().await
    }

    async fn discard(&self, job: &Job) -> BrokerResult<()> {
        (**self).discard(job).await
    }

    async fn finalize(&self, job: &Job) -> BrokerResult<()> {
        (**self).finalize(job).await
    }

    async fn get(&self, id: JobId) -> BrokerResult<Option<Job>> {
        (**self).get(id).await
    }

    async fn queue_depth(&self) -> BrokerResult<u64> {
        (**self).queue_depth().await
    }

    async fn close(&self) -> BrokerResult<()> {
        (**self).close().await
    }
}
