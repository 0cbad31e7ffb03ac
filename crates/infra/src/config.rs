//! Configuration loading and representation.
//!
//! Defaults overlaid by unprefixed environment variables (`PORT`,
//! `REDIS_URL`, `JOB_MAX_ATTEMPTS`, ...). Values are validated once at load
//! time; a bad value fails startup.

use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;

use jobflow_core::{BackoffKind, BackoffPolicy, JobOptions};
use jobflow_observability::LogFormat;

use crate::jobs::JobEngineConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

/// Settings as read from the environment, before validation.
#[derive(Debug, Deserialize)]
struct RawSettings {
    port: u16,
    worker_port: u16,
    redis_url: Option<String>,
    queue_name: String,
    worker_url: String,
    upstream_timeout_ms: u64,
    job_max_attempts: u32,
    job_backoff_type: String,
    job_backoff_delay_ms: u64,
    worker_concurrency: usize,
    poll_interval_ms: u64,
    shutdown_drain_timeout_ms: u64,
    log_format: String,
}

/// Validated process settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Gateway listen port
    pub port: u16,
    pub worker_port: u16,
    /// Unset selects the in-memory broker
    pub redis_url: Option<String>,
    /// Broker key prefix
    pub queue_name: String,
    /// Gateway upstream base URL
    pub worker_url: String,
    pub upstream_timeout: Duration,
    pub job_options: JobOptions,
    pub worker_concurrency: usize,
    pub poll_interval: Duration,
    pub drain_timeout: Duration,
    pub log_format: LogFormat,
}

impl Settings {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Environment::default().try_parsing(true))
    }

    fn load(env: Environment) -> Result<Self, ConfigError> {
        let raw: RawSettings = Config::builder()
            .set_default("port", 3000_i64)?
            .set_default("worker_port", 3001_i64)?
            .set_default("queue_name", "job-processing")?
            .set_default("worker_url", "http://worker-service:3001")?
            .set_default("upstream_timeout_ms", 5000_i64)?
            .set_default("job_max_attempts", 3_i64)?
            .set_default("job_backoff_type", "exponential")?
            .set_default("job_backoff_delay_ms", 2000_i64)?
            .set_default("worker_concurrency", 4_i64)?
            .set_default("poll_interval_ms", 100_i64)?
            .set_default("shutdown_drain_timeout_ms", 10_000_i64)?
            .set_default("log_format", "json")?
            .add_source(env)
            .build()?
            .try_deserialize()?;

        Self::try_from(raw)
    }

    /// Engine settings for a process named `name`.
    pub fn engine_config(&self, name: impl Into<String>) -> JobEngineConfig {
        JobEngineConfig::default()
            .with_name(name)
            .with_concurrency(self.worker_concurrency)
            .with_poll_interval(self.poll_interval)
            .with_drain_timeout(self.drain_timeout)
    }
}

impl TryFrom<RawSettings> for Settings {
    type Error = ConfigError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        let kind: BackoffKind = raw
            .job_backoff_type
            .parse()
            .map_err(|e| ConfigError::invalid("JOB_BACKOFF_TYPE", format!("{e}")))?;
        let delay = Duration::from_millis(raw.job_backoff_delay_ms);
        let backoff = match kind {
            BackoffKind::Exponential => BackoffPolicy::exponential(delay),
            BackoffKind::Fixed => BackoffPolicy::fixed(delay),
        };
        let job_options = JobOptions::new(raw.job_max_attempts, backoff)
            .map_err(|e| ConfigError::invalid("JOB_MAX_ATTEMPTS", e.to_string()))?;

        if raw.worker_concurrency == 0 {
            return Err(ConfigError::invalid("WORKER_CONCURRENCY", "must be at least 1"));
        }
        if raw.queue_name.trim().is_empty() {
            return Err(ConfigError::invalid("QUEUE_NAME", "must not be empty"));
        }

        let log_format = raw
            .log_format
            .parse()
            .map_err(|e: String| ConfigError::invalid("LOG_FORMAT", e))?;

        Ok(Self {
            port: raw.port,
            worker_port: raw.worker_port,
            redis_url: raw.redis_url.filter(|url| !url.trim().is_empty()),
            queue_name: raw.queue_name,
            worker_url: raw.worker_url.trim_end_matches('/').to_string(),
            upstream_timeout: Duration::from_millis(raw.upstream_timeout_ms),
            job_options,
            worker_concurrency: raw.worker_concurrency,
            poll_interval: Duration::from_millis(raw.poll_interval_ms),
            drain_timeout: Duration::from_millis(raw.shutdown_drain_timeout_ms),
            log_format,
        })
    }
}
