//! Rate limiter trait and quota policy.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use vidscribe_core::{rate_window_key, LimiterError, RateDecision, RateQuota, ResourceClass};

/// Prefix of every rate window key.
pub const DEFAULT_KEY_PREFIX: &str = "ratelimit";

/// Shared admission control.
///
/// `limit` is a single atomic check-and-increment: concurrent calls for the
/// same `(identity, class)` from any number of instances never admit more
/// than the quota within one window.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Decide whether one request from `identity` in `class` is admitted.
    ///
    /// An admitted request is counted before this returns. A rejected one is
    /// not counted.
    async fn limit(
        &self,
        identity: &str,
        class: &ResourceClass,
    ) -> Result<RateDecision, LimiterError>;

    /// Delete admission records older than the longest configured window.
    /// Returns how many records (or idle keys) were removed.
    async fn purge_expired(&self) -> Result<u64, LimiterError>;
}

/// Quotas per resource class plus the storage key prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterPolicy {
    pub prefix: String,
    pub quotas: HashMap<ResourceClass, RateQuota>,
}

impl Default for LimiterPolicy {
    fn default() -> Self {
        let quotas = HashMap::from([
            (ResourceClass::TRANSCRIBE, RateQuota::per_minute(5)),
            (ResourceClass::TTS, RateQuota::per_minute(10)),
            (ResourceClass::CHAT, RateQuota::per_minute(30)),
            (ResourceClass::METADATA, RateQuota::per_minute(60)),
        ]);
        Self {
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            quotas,
        }
    }
}

impl LimiterPolicy {
    /// A policy with no classes configured.
    pub fn empty() -> Self {
        Self {
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            quotas: HashMap::new(),
        }
    }

    pub fn with_quota(mut self, class: ResourceClass, quota: RateQuota) -> Self {
        self.quotas.insert(class, quota);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Quota for `class`; unknown classes are a configuration error.
    pub fn quota_for(&self, class: &ResourceClass) -> Result<RateQuota, LimiterError> {
        self.quotas
            .get(class)
            .copied()
            .ok_or_else(|| LimiterError::UnknownClass {
                class: class.to_string(),
            })
    }

    pub fn window_key(&self, class: &ResourceClass, identity: &str) -> String {
        rate_window_key(&self.prefix, class, identity)
    }

    /// The longest window of any class; records older than this cannot
    /// affect a decision.
    pub fn longest_window(&self) -> Duration {
        self.quotas
            .values()
            .map(|q| q.window)
            .max()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_quotas() {
        let policy = LimiterPolicy::default();
        assert_eq!(
            policy.quota_for(&ResourceClass::TRANSCRIBE).unwrap(),
            RateQuota::new(5, Duration::from_secs(60))
        );
        assert_eq!(policy.quota_for(&ResourceClass::METADATA).unwrap().limit, 60);
    }

    #[test]
    fn test_unknown_class_is_an_error() {
        let policy = LimiterPolicy::empty();
        assert!(matches!(
            policy.quota_for(&ResourceClass::new("upload")),
            Err(LimiterError::UnknownClass { .. })
        ));
    }

    #[test]
    fn test_longest_window() {
        let policy = LimiterPolicy::empty()
            .with_quota(ResourceClass::CHAT, RateQuota::new(5, Duration::from_secs(10)))
            .with_quota(ResourceClass::TTS, RateQuota::new(5, Duration::from_secs(90)));
        assert_eq!(policy.longest_window(), Duration::from_secs(90));
        assert_eq!(LimiterPolicy::empty().longest_window(), Duration::ZERO);
    }

    #[test]
    fn test_window_key_uses_prefix() {
        let policy = LimiterPolicy::default().with_prefix("rl");
        assert_eq!(
            policy.window_key(&ResourceClass::CHAT, "1.2.3.4"),
            "rl:chat:1.2.3.4"
        );
    }
}
