//! Retry options and backoff computation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, LifecycleResult};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
}

impl core::str::FromStr for BackoffKind {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            other => Err(LifecycleError::invalid_options(format!(
                "unknown backoff type {other:?} (expected \"fixed\" or \"exponential\")"
            ))),
        }
    }
}

/// Backoff policy: maps attempt count to the delay before redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(rename = "type")]
    pub kind: BackoffKind,
    /// Base delay in milliseconds.
    pub delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(2000))
    }
}

impl BackoffPolicy {
    pub fn exponential(base_delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay_ms: base_delay.as_millis() as u64,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Delay before redelivery after `attempts_made` failed attempts (1-indexed).
    ///
    /// Saturates instead of overflowing for very large attempt counts.
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        if attempts_made == 0 {
            return Duration::ZERO;
        }

        let ms = match self.kind {
            BackoffKind::Fixed => self.delay_ms,
            BackoffKind::Exponential => 2_u64
                .checked_pow(attempts_made - 1)
                .and_then(|factor| self.delay_ms.checked_mul(factor))
                .unwrap_or(u64::MAX),
        };

        Duration::from_millis(ms)
    }
}

/// Per-job retry options, fixed at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Total attempts allowed, including the first one.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl JobOptions {
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> LifecycleResult<Self> {
        let options = Self {
            max_attempts,
            backoff,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> LifecycleResult<()> {
        if self.max_attempts == 0 {
            return Err(LifecycleError::invalid_options("max_attempts must be at least 1"));
        }
        Ok(())
    }
}
