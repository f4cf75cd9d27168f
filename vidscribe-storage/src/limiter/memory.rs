//! In-process sliding-window limiter.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use vidscribe_core::{chrono_duration, Clock, LimiterError, RateDecision, ResourceClass, SystemClock};

use super::traits::{LimiterPolicy, RateLimiter};
use super::window::SlidingLog;

/// Rate limiter for a single process.
///
/// The shard lock held through `DashMap::entry` makes the slide, check and
/// record of one key a single critical section.
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    policy: LimiterPolicy,
    windows: DashMap<String, SlidingLog>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRateLimiter {
    pub fn new(policy: LimiterPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: LimiterPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            windows: DashMap::new(),
            clock,
        }
    }

    /// Number of tracked windows.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn limit(
        &self,
        identity: &str,
        class: &ResourceClass,
    ) -> Result<RateDecision, LimiterError> {
        let quota = self.policy.quota_for(class)?;
        let key = self.policy.window_key(class, identity);
        let now = self.clock.now();

        let decision = self
            .windows
            .entry(key)
            .or_default()
            .check_and_record(quota, now);

        if !decision.allowed {
            tracing::debug!(identity, class = %class, reset_at = %decision.reset_at, "rate limited");
        }
        Ok(decision)
    }

    /// Slides every log past the longest window and drops the keys left
    /// empty. Returns how many keys were removed.
    async fn purge_expired(&self) -> Result<u64, LimiterError> {
        let horizon = self.clock.now() - chrono_duration(self.policy.longest_window());
        let before = self.windows.len();
        self.windows.retain(|_, log| {
            log.slide(horizon);
            !log.is_empty()
        });
        Ok(before.saturating_sub(self.windows.len()) as u64)
    }
}
