use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use tracing::{error, info};

use jobflow_observability::Telemetry;

use crate::app::dto::{HealthResponse, ReadyResponse, StatusResponse};
use crate::app::services::{GatewayServices, WorkerServices};
use crate::context::CorrelationContext;

pub async fn worker_health(Extension(services): Extension<Arc<WorkerServices>>) -> Json<HealthResponse> {
    info!("Worker health check endpoint called");
    let snapshot = services.health.snapshot();

    Json(HealthResponse {
        status: if snapshot.is_healthy { "healthy" } else { "unhealthy" },
        timestamp: Utc::now(),
        uptime: services.started_at.uptime_secs(),
        last_processed: Some(snapshot.last_processed_at.unwrap_or(services.started_at.wall)),
    })
}

pub async fn gateway_health(Extension(services): Extension<Arc<GatewayServices>>) -> Json<HealthResponse> {
    info!("Health check endpoint called");

    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        uptime: services.started_at.uptime_secs(),
        last_processed: None,
    })
}

pub async fn ready() -> Json<ReadyResponse> {
    info!("Readiness check endpoint called");
    Json(ReadyResponse {
        status: "ready",
        timestamp: Utc::now(),
    })
}

/// Prometheus exposition; refreshes `job_queue_size` from the broker first.
pub async fn worker_metrics(Extension(services): Extension<Arc<WorkerServices>>) -> Response {
    match services.broker.queue_depth().await {
        Ok(depth) => services.telemetry.set_queue_size(depth),
        Err(err) => {
            error!(error = %err, "failed to read queue depth");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    }
    render_metrics(&services.telemetry)
}

pub async fn gateway_metrics(Extension(services): Extension<Arc<GatewayServices>>) -> Response {
    render_metrics(&services.telemetry)
}

fn render_metrics(telemetry: &Telemetry) -> Response {
    match telemetry.render() {
        Ok(body) => ([(header::CONTENT_TYPE, telemetry.content_type())], body).into_response(),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

pub async fn api_status(
    Extension(services): Extension<Arc<GatewayServices>>,
    Extension(ctx): Extension<CorrelationContext>,
) -> Json<StatusResponse> {
    info!(correlation_id = %ctx.correlation_id(), "Status endpoint called");
    services.telemetry.record_business_operation("status_check");

    Json(StatusResponse {
        status: "API service is running",
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
