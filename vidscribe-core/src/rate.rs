//! Admission-control data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Fixed quota for one resource class: at most `limit` admissions within any
/// trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateQuota {
    pub limit: u32,
    pub window: Duration,
}

impl RateQuota {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }
}

/// Parses `"<limit>/<window-seconds>"`, e.g. `"5/60"`.
impl FromStr for RateQuota {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            field: "rate_quota".to_string(),
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (limit, window) = s
            .split_once('/')
            .ok_or_else(|| invalid("expected <limit>/<window-seconds>"))?;
        let limit: u32 = limit
            .trim()
            .parse()
            .map_err(|_| invalid("limit is not a number"))?;
        let window_secs: u64 = window
            .trim()
            .parse()
            .map_err(|_| invalid("window is not a number"))?;
        if limit == 0 {
            return Err(invalid("limit must be at least 1"));
        }
        if window_secs == 0 {
            return Err(invalid("window must be at least 1 second"));
        }

        Ok(Self::new(limit, Duration::from_secs(window_secs)))
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RateDecision {
    /// Whether the request was admitted (and counted).
    pub allowed: bool,
    /// Configured quota for the class.
    pub limit: u32,
    /// Admissions still available in the current trailing window.
    pub remaining: u32,
    /// When the oldest admission in the window expires, freeing capacity.
    pub reset_at: DateTime<Utc>,
}

impl RateDecision {
    /// Whole seconds until `reset_at`, never less than one.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}
