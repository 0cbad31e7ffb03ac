//! Gateway → worker HTTP client.

use std::time::Duration;

use jobflow_core::CorrelationId;

use crate::app::dto::{ForwardedJob, JobQueuedResponse};

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("worker did not respond within {0:?}")]
    Timeout(Duration),

    #[error("worker request failed: {0}")]
    Transport(String),

    #[error("worker responded with status {status}")]
    Status { status: u16 },

    #[error("worker response could not be decoded: {0}")]
    Decode(String),
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, UpstreamError::Timeout(_))
    }
}

/// Client for the worker's job submission endpoint.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl WorkerClient {
    /// `base_url` without a trailing slash, e.g. `http://worker-service:3001`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Forward `payload` to `POST {base_url}/job`, propagating the
    /// correlation id in both the header and the body.
    pub async fn submit_job(
        &self,
        payload: serde_json::Value,
        correlation_id: &CorrelationId,
    ) -> Result<JobQueuedResponse, UpstreamError> {
        let body = ForwardedJob {
            data: payload,
            correlation_id: correlation_id.clone(),
        };

        let res = self
            .http
            .post(format!("{}/job", self.base_url))
            .header(CorrelationId::HEADER, correlation_id.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = res.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
            });
        }

        res.json::<JobQueuedResponse>().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(self.timeout)
            } else {
                UpstreamError::Decode(e.to_string())
            }
        })
    }

    fn classify(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}
