//! Processing health signal.
//!
//! Degrades on a single failure and recovers only on the next success. There
//! is no averaging or thresholding.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

use jobflow_events::{JobEvent, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub is_healthy: bool,
    pub last_processed_at: Option<DateTime<Utc>>,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            is_healthy: true,
            last_processed_at: None,
        }
    }
}

/// Shared health state. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    state: Arc<Mutex<HealthSnapshot>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(&self) {
        self.write(HealthSnapshot {
            is_healthy: true,
            last_processed_at: Some(Utc::now()),
        });
    }

    /// Processing failure, queue error or enqueue failure.
    pub fn on_failure(&self) {
        let mut state = self.lock();
        *state = HealthSnapshot {
            is_healthy: false,
            last_processed_at: state.last_processed_at,
        };
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        *self.lock()
    }

    pub fn is_healthy(&self) -> bool {
        self.snapshot().is_healthy
    }

    /// Fold one bus event into the signal. Events that do not close an
    /// attempt are ignored.
    pub fn apply(&self, event: &JobEvent) {
        match event {
            JobEvent::Completed { .. } => self.on_success(),
            JobEvent::Retrying { .. }
            | JobEvent::Failed { .. }
            | JobEvent::QueueError { .. }
            | JobEvent::EnqueueFailed { .. } => self.on_failure(),
            JobEvent::Started { .. } | JobEvent::Discarded { .. } => {}
        }
    }

    /// Apply events from `subscription` in publish order until the bus goes
    /// away.
    pub fn spawn_listener(&self, mut subscription: Subscription<JobEvent>) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                tracker.apply(&event);
            }
            debug!("health listener stopped");
        })
    }

    fn write(&self, snapshot: HealthSnapshot) {
        *self.lock() = snapshot;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HealthSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
