//! Admission, caching and enqueueing for incoming requests.
//!
//! Every expensive request goes through the same pipeline:
//!
//! 1. `admit`: atomic check-and-count against the shared limiter. A limiter
//!    fault rejects the request (fail closed).
//! 2. Cache lookup through the fail-open wrapper. A cache fault is a miss.
//! 3. Either enqueue (long operations, the caller gets a job handle) or an
//!    inline fetch under a timeout (short operations).

use std::sync::Arc;
use std::time::Duration;
use vidscribe_core::{
    Clock, FetchError, Job, JobEvent, JobPayload, RateDecision, ResourceClass, UpstreamFetcher,
};
use vidscribe_storage::{FailOpenCache, JobQueue, RateLimiter};

use crate::error::{ApiError, ApiResult};
use crate::jobs::JobNotifier;
use crate::telemetry::metrics;

/// Outcome of [`ResourceGateway::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The result was already cached; nothing was enqueued.
    Cached(serde_json::Value),
    /// A new job was enqueued.
    Enqueued { job: Job, position: Option<u64> },
}

/// Outcome of [`ResourceGateway::fetch_inline`].
#[derive(Debug, Clone, PartialEq)]
pub struct InlineFetch {
    pub value: serde_json::Value,
    pub cached: bool,
}

pub struct ResourceGateway {
    limiter: Arc<dyn RateLimiter>,
    cache: Arc<FailOpenCache>,
    queue: Arc<dyn JobQueue>,
    notifier: JobNotifier,
    clock: Arc<dyn Clock>,
    rate_limit_enabled: bool,
    inline_timeout: Duration,
}

impl ResourceGateway {
    pub fn new(
        limiter: Arc<dyn RateLimiter>,
        cache: Arc<FailOpenCache>,
        queue: Arc<dyn JobQueue>,
        notifier: JobNotifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            limiter,
            cache,
            queue,
            notifier,
            clock,
            rate_limit_enabled: true,
            inline_timeout: Duration::from_secs(crate::constants::DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }

    /// Bypass the limiter entirely. Development only.
    pub fn with_rate_limit_enabled(mut self, enabled: bool) -> Self {
        self.rate_limit_enabled = enabled;
        self
    }

    pub fn with_inline_timeout(mut self, timeout: Duration) -> Self {
        self.inline_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<FailOpenCache> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Check and count one request from `identity` in `class`.
    ///
    /// Returns the admitting decision, or `None` when rate limiting is
    /// disabled.
    pub async fn admit(
        &self,
        identity: &str,
        class: &ResourceClass,
    ) -> ApiResult<Option<RateDecision>> {
        if !self.rate_limit_enabled {
            return Ok(None);
        }

        let decision = match self.limiter.limit(identity, class).await {
            Ok(decision) => decision,
            Err(e) => {
                if let Some(m) = metrics() {
                    m.record_rate_decision(class.as_str(), "error");
                }
                return Err(e.into());
            }
        };

        if let Some(m) = metrics() {
            let outcome = if decision.allowed { "allowed" } else { "rejected" };
            m.record_rate_decision(class.as_str(), outcome);
        }

        if !decision.allowed {
            tracing::info!(
                identity,
                class = %class,
                limit = decision.limit,
                reset_at = %decision.reset_at,
                "rate limit exceeded"
            );
            return Err(ApiError::too_many_requests(&decision, self.clock.now()));
        }
        Ok(Some(decision))
    }

    async fn cached(&self, payload: &JobPayload) -> Option<serde_json::Value> {
        let hit = self.cache.get(&payload.cache_key()).await;
        if let Some(m) = metrics() {
            m.record_cache_lookup(hit.is_some());
        }
        hit
    }

    /// Admit, then answer from cache or enqueue a job for the workers.
    pub async fn submit(
        &self,
        identity: &str,
        class: &ResourceClass,
        payload: JobPayload,
    ) -> ApiResult<Submission> {
        self.admit(identity, class).await?;

        if let Some(value) = self.cached(&payload).await {
            tracing::debug!(resource = %payload.resource, "served from cache");
            return Ok(Submission::Cached(value));
        }

        if self.queue.is_overloaded().await? {
            tracing::warn!(
                queue = self.queue.name(),
                threshold = self.queue.settings().overload_threshold,
                "queue overloaded, rejecting submission"
            );
            return Err(ApiError::queue_overloaded(None));
        }

        let job = self.queue.enqueue(payload).await?;
        self.notifier
            .publish(JobEvent::from_job(&job, self.clock.now()));
        self.notifier.wake_worker();

        let position = self.queue.position_in_queue(job.id).await?;
        if let Some(m) = metrics() {
            if let Ok(waiting) = self.queue.waiting_count().await {
                m.set_queue_waiting(waiting);
            }
        }

        tracing::info!(
            job_id = %job.id,
            resource = %job.payload.resource,
            position = ?position,
            "job enqueued"
        );
        Ok(Submission::Enqueued { job, position })
    }

    /// Admit against the quota of `fetcher`'s class, then answer from cache
    /// or call `fetcher` directly under the inline timeout, caching a
    /// successful result.
    pub async fn fetch_inline(
        &self,
        identity: &str,
        payload: &JobPayload,
        fetcher: &dyn UpstreamFetcher,
    ) -> ApiResult<InlineFetch> {
        self.admit(identity, &fetcher.class()).await?;

        if let Some(value) = self.cached(payload).await {
            return Ok(InlineFetch {
                value,
                cached: true,
            });
        }

        let value = match tokio::time::timeout(self.inline_timeout, fetcher.fetch(payload)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(FetchError::Timeout {
                    after: self.inline_timeout,
                }
                .into())
            }
        };

        self.cache.put(&payload.cache_key(), &value).await;
        Ok(InlineFetch {
            value,
            cached: false,
        })
    }
}

impl std::fmt::Debug for ResourceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGateway")
            .field("queue", &self.queue.name())
            .field("rate_limit_enabled", &self.rate_limit_enabled)
            .field("inline_timeout", &self.inline_timeout)
            .finish()
    }
}
