//! Tracing, logging, metrics (shared setup).

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(format: LogFormat) {
    tracing::init(format);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Metrics registry and exposition.
pub mod metrics;

pub use metrics::{MetricsError, Telemetry};
pub use tracing::LogFormat;
