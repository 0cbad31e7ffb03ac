use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use jobflow_core::CorrelationId;

/// Error body shared by both services: `{error, correlationId}`.
pub fn json_error(
    status: StatusCode,
    error: &'static str,
    correlation_id: &CorrelationId,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": error,
            "correlationId": correlation_id,
        })),
    )
        .into_response()
}
