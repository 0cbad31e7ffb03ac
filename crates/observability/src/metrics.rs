//! Prometheus metrics for the HTTP surfaces and the job engine.
//!
//! One [`Telemetry`] per process. Every metric carries a constant `app` label
//! naming the service.

use std::collections::HashMap;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),

    #[error("metrics encoding is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Process metrics collector.
#[derive(Clone)]
pub struct Telemetry {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration: HistogramVec,
    jobs_processed_total: IntCounterVec,
    job_processing_duration: HistogramVec,
    job_queue_size: IntGauge,
    business_operations_total: IntCounterVec,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("registry", &"Registry")
            .finish()
    }
}

impl Telemetry {
    /// Create a collector whose metrics are labelled `app=<app>`.
    pub fn new(app: &str) -> Result<Self, MetricsError> {
        let mut labels = HashMap::new();
        labels.insert("app".to_string(), app.to_string());
        let registry = Registry::new_custom(None, Some(labels))?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "route", "status_code"],
        )?;
        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Duration of HTTP requests in seconds",
            ),
            &["method", "route", "status_code"],
        )?;
        let jobs_processed_total = IntCounterVec::new(
            Opts::new("jobs_processed_total", "Total number of jobs processed"),
            &["job_type", "status"],
        )?;
        let job_processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "job_processing_duration_seconds",
                "Duration of job processing in seconds",
            ),
            &["job_type", "status"],
        )?;
        let job_queue_size = IntGauge::new("job_queue_size", "Current size of the job queue")?;
        let business_operations_total = IntCounterVec::new(
            Opts::new(
                "business_operations_total",
                "Total number of business operations performed",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(jobs_processed_total.clone()))?;
        registry.register(Box::new(job_processing_duration.clone()))?;
        registry.register(Box::new(job_queue_size.clone()))?;
        registry.register(Box::new(business_operations_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            jobs_processed_total,
            job_processing_duration,
            job_queue_size,
            business_operations_total,
        })
    }

    /// Content type of [`Telemetry::render`] output.
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// Record one finished HTTP request.
    pub fn record_http(&self, method: &str, route: &str, status_code: u16, duration: Duration) {
        let status = status_code.to_string();
        let labels = [method, route, status.as_str()];
        self.http_requests_total.with_label_values(&labels).inc();
        self.http_request_duration
            .with_label_values(&labels)
            .observe(duration.as_secs_f64());
    }

    /// Record one finished job attempt (`status` is `success` or `error`).
    pub fn record_job(&self, job_type: &str, status: &str, duration: Duration) {
        self.jobs_processed_total
            .with_label_values(&[job_type, status])
            .inc();
        self.job_processing_duration
            .with_label_values(&[job_type, status])
            .observe(duration.as_secs_f64());
    }

    pub fn set_queue_size(&self, size: u64) {
        self.job_queue_size.set(i64::try_from(size).unwrap_or(i64::MAX));
    }

    pub fn record_business_operation(&self, operation: &str) {
        self.business_operations_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn jobs_processed(&self, job_type: &str, status: &str) -> u64 {
        self.jobs_processed_total
            .with_label_values(&[job_type, status])
            .get()
    }

    pub fn http_requests(&self, method: &str, route: &str, status_code: u16) -> u64 {
        let status = status_code.to_string();
        self.http_requests_total
            .with_label_values(&[method, route, status.as_str()])
            .get()
    }

    pub fn business_operations(&self, operation: &str) -> u64 {
        self.business_operations_total
            .with_label_values(&[operation])
            .get()
    }

    pub fn queue_size(&self) -> i64 {
        self.job_queue_size.get()
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_counters_are_labelled_by_type_and_status() {
        let t = Telemetry::new("worker-service").unwrap();

        t.record_job("process-job", "success", Duration::from_millis(20));
        t.record_job("process-job", "error", Duration::from_millis(20));
        t.record_job("process-job", "error", Duration::from_millis(20));

        assert_eq!(t.jobs_processed("process-job", "success"), 1);
        assert_eq!(t.jobs_processed("process-job", "error"), 2);
    }

    #[test]
    fn render_includes_app_label_and_all_families() {
        let t = Telemetry::new("worker-service").unwrap();
        t.record_http("GET", "/health", 200, Duration::from_millis(1));
        t.record_job("process-job", "success", Duration::from_millis(1));
        t.record_business_operation("job_creation");
        t.set_queue_size(4);

        let text = t.render().unwrap();

        assert!(text.contains("http_requests_total"));
        assert!(text.contains("http_request_duration_seconds"));
        assert!(text.contains("jobs_processed_total"));
        assert!(text.contains("job_processing_duration_seconds"));
        assert!(text.contains("business_operations_total"));
        assert!(text.contains("job_queue_size{app=\"worker-service\"} 4"));
    }

    #[test]
    fn collectors_are_independent_per_instance() {
        let a = Telemetry::new("a").unwrap();
        let b = Telemetry::new("b").unwrap();
        a.record_http("POST", "/job", 201, Duration::ZERO);

        assert_eq!(a.http_requests("POST", "/job", 201), 1);
        assert_eq!(b.http_requests("POST", "/job", 201), 0);
    }
}
