//! The unit of work the engine runs for each delivery.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use jobflow_core::{Job, JobOutcome};

/// Executes one attempt of a job.
///
/// The handler receives an owned snapshot of the job (payload plus read-only
/// metadata) and reports what happened. It never decides about retries.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: Job) -> JobOutcome;
}

#[async_trait]
impl<H> JobHandler for Arc<H>
where
    H: JobHandler + ?Sized,
{
    async fn handle(&self, job: Job) -> JobOutcome {
        (**self).handle(job).await
    }
}

/// Adapter turning an async closure into a [`JobHandler`].
#[derive(Debug, Clone)]
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobOutcome> + Send + 'static,
{
    async fn handle(&self, job: Job) -> JobOutcome {
        (self.f)(job).await
    }
}

/// Build a handler from an async closure.
///
/// ```ignore
/// let handler = handler_fn(|job: Job| async move {
///     if job.payload.is_null() {
///         JobOutcome::terminal("empty payload")
///     } else {
///         JobOutcome::Success
///     }
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobOutcome> + Send + 'static,
{
    FnHandler { f }
}
