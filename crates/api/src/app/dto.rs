use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobflow_core::{CorrelationId, JobId};

/// `POST /job` success body (worker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQueuedResponse {
    pub job_id: JobId,
    pub correlation_id: CorrelationId,
    pub message: String,
}

/// `POST /api/job` success body (gateway).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreatedResponse {
    pub message: String,
    pub job_id: JobId,
    pub correlation_id: CorrelationId,
}

/// Body the gateway forwards to the worker's `POST /job`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedJob {
    pub data: serde_json::Value,
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    /// Process uptime in seconds
    pub uptime: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_processed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
}
