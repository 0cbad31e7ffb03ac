//! HTTP surfaces of the pipeline: the worker service (queue + engine) and
//! the gateway that fronts it.

pub mod app;
pub mod context;
pub mod middleware;
pub mod shutdown;
pub mod upstream;

/// Service name of the worker process (metrics `app` label).
pub const WORKER_SERVICE: &str = "worker-service";

/// Service name of the gateway process (metrics `app` label).
pub const GATEWAY_SERVICE: &str = "api-service";
