//! Configuration values shared by the storage backends and the worker pool.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Bounded retry policy with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based), or `None` once the retry
    /// budget is spent.
    ///
    /// `delay_n = initial * multiplier^n`, capped at `max_backoff`.
    pub fn backoff_for(&self, retry: u32) -> Option<Duration> {
        if retry >= self.max_retries {
            return None;
        }
        let factor = f64::from(self.backoff_multiplier.max(1.0)).powi(retry as i32);
        let millis = (self.initial_backoff.as_millis() as f64 * factor).round();
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::InvalidValue {
                field: "retry.initial_backoff".to_string(),
                value: format!("{:?}", self.initial_backoff),
                reason: "must not exceed max_backoff".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// QUEUE SETTINGS
// ============================================================================

/// Settings for one named job queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Queue name; jobs are keyed by queue name plus job id.
    pub name: String,
    /// `is_overloaded` reports true when the waiting count exceeds this.
    pub overload_threshold: u64,
    /// How long a dequeued job stays exclusively owned without renewal.
    pub lease_duration: Duration,
    /// Deliveries allowed before an expired lease fails the job.
    pub max_deliveries: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: "transcripts".to_string(),
            overload_threshold: 20,
            lease_duration: Duration::from_secs(60),
            max_deliveries: 3,
        }
    }
}

impl QueueSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_overload_threshold(mut self, threshold: u64) -> Self {
        self.overload_threshold = threshold;
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_max_deliveries(mut self, max: u32) -> Self {
        self.max_deliveries = max;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "queue.name".to_string(),
            });
        }
        if self.max_deliveries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.max_deliveries".to_string(),
                value: "0".to_string(),
                reason: "at least one delivery is required".to_string(),
            });
        }
        if self.lease_duration.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "queue.lease_duration".to_string(),
                value: "0s".to_string(),
                reason: "lease must be positive".to_string(),
            });
        }
        Ok(())
    }
}
