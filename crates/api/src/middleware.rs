use std::time::Instant;

use axum::{
    extract::{MatchedPath, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};

use jobflow_core::CorrelationId;
use jobflow_observability::Telemetry;

use crate::context::CorrelationContext;

/// Resolve the request's correlation id (generated when absent) and echo it
/// on the response.
pub async fn correlation_id(mut req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let incoming = req
        .headers()
        .get(CorrelationId::HEADER)
        .and_then(|value| value.to_str().ok());
    let correlation_id = CorrelationId::from_optional(incoming);

    req.extensions_mut()
        .insert(CorrelationContext::new(correlation_id.clone()));

    let mut res = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        res.headers_mut().insert(CorrelationId::HEADER, value);
    }
    res
}

/// Record `http_requests_total` and `http_request_duration_seconds`, labelled
/// with the matched route template rather than the raw path.
pub async fn http_metrics(
    State(telemetry): State<Telemetry>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let started = Instant::now();
    let res = next.run(req).await;
    telemetry.record_http(&method, &route, res.status().as_u16(), started.elapsed());

    res
}
