use axum::{
    routing::{get, post},
    Router,
};

pub mod jobs;
pub mod system;

/// Worker endpoints.
pub fn worker_router() -> Router {
    Router::new()
        .route("/health", get(system::worker_health))
        .route("/ready", get(system::ready))
        .route("/metrics", get(system::worker_metrics))
        .route("/job", post(jobs::enqueue_job))
}

/// Gateway endpoints.
pub fn gateway_router() -> Router {
    Router::new()
        .route("/health", get(system::gateway_health))
        .route("/ready", get(system::ready))
        .route("/metrics", get(system::gateway_metrics))
        .route("/api/status", get(system::api_status))
        .route("/api/job", post(jobs::create_job))
}
