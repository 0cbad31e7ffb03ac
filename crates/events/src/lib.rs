//! Job outcome events and the bus that distributes them.
//!
//! The lifecycle engine publishes; side-effect consumers (health tracking,
//! telemetry, logging) subscribe. Processing never calls those consumers
//! directly.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::{JobContext, JobEvent};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
