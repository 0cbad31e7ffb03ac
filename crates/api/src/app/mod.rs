//! HTTP application wiring (Axum routers + service wiring).
//!
//! - `services.rs`: infrastructure wiring (broker, bus, engine, subscribers)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::{GatewayServices, WorkerServices};

/// Worker router: health, readiness, metrics and job submission.
pub fn build_worker_app(services: Arc<WorkerServices>) -> Router {
    let telemetry = services.telemetry.clone();

    routes::worker_router()
        .layer(Extension(services))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::correlation_id))
                .layer(axum::middleware::from_fn_with_state(
                    telemetry,
                    middleware::http_metrics,
                )),
        )
}

/// Gateway router: health, readiness, metrics, status and job creation.
pub fn build_gateway_app(services: Arc<GatewayServices>) -> Router {
    let telemetry = services.telemetry.clone();

    routes::gateway_router()
        .layer(Extension(services))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::correlation_id))
                .layer(axum::middleware::from_fn_with_state(
                    telemetry,
                    middleware::http_metrics,
                )),
        )
}
