use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info};

use crate::app::dto::{JobCreatedResponse, JobQueuedResponse};
use crate::app::errors::json_error;
use crate::app::services::{GatewayServices, WorkerServices};
use crate::context::CorrelationContext;

/// A body that is missing or not JSON is queued as `{}`.
fn payload_of(body: Option<Json<serde_json::Value>>) -> serde_json::Value {
    body.map(|Json(value)| value)
        .unwrap_or_else(|| serde_json::json!({}))
}

/// Worker `POST /job`: enqueue the request body.
pub async fn enqueue_job(
    Extension(services): Extension<Arc<WorkerServices>>,
    Extension(ctx): Extension<CorrelationContext>,
    body: Option<Json<serde_json::Value>>,
) -> Response {
    let correlation_id = ctx.correlation_id();
    info!(correlation_id = %correlation_id, "Job submission endpoint called");

    match services
        .gateway
        .submit(payload_of(body), Some(correlation_id.as_str()))
        .await
    {
        Ok(submission) => (
            StatusCode::CREATED,
            Json(JobQueuedResponse {
                job_id: submission.job_id,
                correlation_id: submission.correlation_id,
                message: "Job queued successfully".to_string(),
            }),
        )
            .into_response(),
        Err(err) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to queue job",
            err.correlation_id(),
        ),
    }
}

/// Gateway `POST /api/job`: forward to the worker.
pub async fn create_job(
    Extension(services): Extension<Arc<GatewayServices>>,
    Extension(ctx): Extension<CorrelationContext>,
    body: Option<Json<serde_json::Value>>,
) -> Response {
    let correlation_id = ctx.correlation_id();
    info!(correlation_id = %correlation_id, "Job creation endpoint called");

    match services.worker.submit_job(payload_of(body), correlation_id).await {
        Ok(queued) => {
            services.telemetry.record_business_operation("job_creation");
            (
                StatusCode::CREATED,
                Json(JobCreatedResponse {
                    message: "Job created successfully".to_string(),
                    job_id: queued.job_id,
                    correlation_id: correlation_id.clone(),
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!(
                correlation_id = %correlation_id,
                error = %err,
                timeout = err.is_timeout(),
                "Error creating job"
            );
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create job",
                correlation_id,
            )
        }
    }
}
