//! Infrastructure layer: broker adapters, the job engine, health tracking and
//! configuration.

pub mod broker;
pub mod config;
pub mod gateway;
pub mod health;
pub mod jobs;
pub mod subscribers;

use jobflow_events::{InMemoryEventBus, JobEvent};

/// The in-process bus every component of a service publishes to.
pub type JobEventBus = InMemoryEventBus<JobEvent>;
