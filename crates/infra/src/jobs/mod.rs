//! Background job processing.
//!
//! ## Components
//!
//! - `JobHandler`: the work done for one attempt
//! - `JobEngine`: polls the broker, runs handlers and applies retry/backoff
//!
//! Retry timing and state transitions live on `jobflow_core::Job`; this module
//! only drives them.

pub mod engine;
pub mod handler;

pub use engine::{EngineError, EngineStats, JobEngine, JobEngineConfig, JobEngineHandle};
pub use handler::{FnHandler, JobHandler, handler_fn};
