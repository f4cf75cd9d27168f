//! Lease Reaper Background Task
//!
//! Periodically fails jobs whose workers vanished. A job whose lease expired
//! and which still has deliveries left is picked up again by `dequeue`; one
//! that used its last delivery would otherwise stay `active` forever, so the
//! reaper fails it with a "lease expired" error.
//!
//! On a slower cadence the same task purges terminal jobs past the retention
//! window, expired rows of the result cache and rate-limit records of
//! identities that stopped calling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use vidscribe_core::{Clock, JobEvent};
use vidscribe_storage::{JobQueue, RateLimiter, ResultCache};

use crate::config::WorkerConfig;
use crate::constants::{
    DEFAULT_JOB_RETENTION_SECS, DEFAULT_PURGE_INTERVAL_SECS, DEFAULT_REAPER_INTERVAL_SECS,
};
use crate::jobs::JobNotifier;
use crate::telemetry;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct LeaseReaperConfig {
    /// How often expired leases are checked (default: 15 seconds)
    pub check_interval: Duration,

    /// How often finished jobs and cache rows are purged (default: 1 hour)
    pub purge_interval: Duration,

    /// Terminal jobs older than this are deleted (default: 24 hours)
    pub retention: Duration,
}

impl Default for LeaseReaperConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            purge_interval: Duration::from_secs(DEFAULT_PURGE_INTERVAL_SECS),
            retention: Duration::from_secs(DEFAULT_JOB_RETENTION_SECS),
        }
    }
}

impl LeaseReaperConfig {
    /// Short intervals for local development.
    pub fn development() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            purge_interval: Duration::from_secs(60),
            retention: Duration::from_secs(600),
        }
    }
}

impl From<&WorkerConfig> for LeaseReaperConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            check_interval: config.reaper_interval,
            purge_interval: config.purge_interval,
            retention: config.retention,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct LeaseReaperMetrics {
    /// Jobs failed after their last lease expired
    pub jobs_reaped: AtomicU64,

    /// Terminal jobs deleted
    pub jobs_purged: AtomicU64,

    /// Expired cache rows deleted
    pub cache_entries_purged: AtomicU64,

    /// Stale rate-limit windows deleted
    pub rate_windows_purged: AtomicU64,

    /// Completed reap cycles
    pub cycles: AtomicU64,

    /// Backend errors encountered
    pub errors: AtomicU64,
}

impl LeaseReaperMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> LeaseReaperSnapshot {
        LeaseReaperSnapshot {
            jobs_reaped: self.jobs_reaped.load(Ordering::Relaxed),
            jobs_purged: self.jobs_purged.load(Ordering::Relaxed),
            cache_entries_purged: self.cache_entries_purged.load(Ordering::Relaxed),
            rate_windows_purged: self.rate_windows_purged.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaseReaperSnapshot {
    pub jobs_reaped: u64,
    pub jobs_purged: u64,
    pub cache_entries_purged: u64,
    pub rate_windows_purged: u64,
    pub cycles: u64,
    pub errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// What the reaper operates on.
#[derive(Clone)]
pub struct ReaperTargets {
    pub queue: Arc<dyn JobQueue>,
    /// The raw backend; purge errors are counted, not swallowed.
    pub cache: Arc<dyn ResultCache>,
    pub limiter: Arc<dyn RateLimiter>,
    pub notifier: JobNotifier,
    pub clock: Arc<dyn Clock>,
}

/// Run until the shutdown signal is received.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(lease_reaper_task(targets, LeaseReaperConfig::default(), shutdown_rx));
///
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn lease_reaper_task(
    targets: ReaperTargets,
    config: LeaseReaperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<LeaseReaperMetrics> {
    let reaper_metrics = Arc::new(LeaseReaperMetrics::new());

    let mut reap_interval = interval(config.check_interval);
    reap_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut purge_interval = interval(config.purge_interval);
    purge_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        queue = targets.queue.name(),
        check_interval_secs = config.check_interval.as_secs(),
        purge_interval_secs = config.purge_interval.as_secs(),
        retention_secs = config.retention.as_secs(),
        "Lease reaper task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Lease reaper task shutting down");
                    break;
                }
            }

            _ = reap_interval.tick() => {
                reap_once(&targets, &reaper_metrics).await;
            }

            _ = purge_interval.tick() => {
                purge_once(&targets, &config, &reaper_metrics).await;
            }
        }
    }

    let snapshot = reaper_metrics.snapshot();
    tracing::info!(
        jobs_reaped = snapshot.jobs_reaped,
        jobs_purged = snapshot.jobs_purged,
        cache_entries_purged = snapshot.cache_entries_purged,
        rate_windows_purged = snapshot.rate_windows_purged,
        cycles = snapshot.cycles,
        errors = snapshot.errors,
        "Lease reaper task completed"
    );

    reaper_metrics
}

/// Fail exhausted jobs and refresh the queue depth gauge.
pub async fn reap_once(targets: &ReaperTargets, reaper_metrics: &LeaseReaperMetrics) -> usize {
    reaper_metrics.cycles.fetch_add(1, Ordering::Relaxed);

    let reaped = match targets.queue.reap_expired().await {
        Ok(reaped) => reaped,
        Err(e) => {
            tracing::error!(error = %e, "Failed to reap expired leases");
            reaper_metrics.errors.fetch_add(1, Ordering::Relaxed);
            return 0;
        }
    };

    let now = targets.clock.now();
    for job in &reaped {
        tracing::warn!(
            job_id = %job.id,
            attempts = job.attempts,
            error = ?job.error,
            "Reaped job with expired lease"
        );
        targets.notifier.publish(JobEvent::from_job(job, now));
    }
    reaper_metrics
        .jobs_reaped
        .fetch_add(reaped.len() as u64, Ordering::Relaxed);

    if let Some(m) = telemetry::metrics() {
        if let Ok(waiting) = targets.queue.waiting_count().await {
            m.set_queue_waiting(waiting);
        }
    }

    if reaped.is_empty() {
        tracing::trace!("Reap cycle completed with no expired leases");
    }
    reaped.len()
}

/// Delete old terminal jobs, expired cache rows and stale limiter windows.
pub async fn purge_once(
    targets: &ReaperTargets,
    config: &LeaseReaperConfig,
    reaper_metrics: &LeaseReaperMetrics,
) {
    match targets.queue.purge_finished(config.retention).await {
        Ok(purged) => {
            reaper_metrics.jobs_purged.fetch_add(purged, Ordering::Relaxed);
            if purged > 0 {
                tracing::info!(purged, "Purged finished jobs");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to purge finished jobs");
            reaper_metrics.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    match targets.cache.purge_expired().await {
        Ok(purged) => {
            reaper_metrics
                .cache_entries_purged
                .fetch_add(purged, Ordering::Relaxed);
            if purged > 0 {
                tracing::debug!(purged, "Purged expired cache entries");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to purge expired cache entries");
            reaper_metrics.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    match targets.limiter.purge_expired().await {
        Ok(purged) => {
            reaper_metrics
                .rate_windows_purged
                .fetch_add(purged, Ordering::Relaxed);
            if purged > 0 {
                tracing::debug!(purged, "Purged stale rate limit windows");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to purge rate limit windows");
            reaper_metrics.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidscribe_core::{CacheKey, JobState, QueueSettings, ResourceClass};
    use vidscribe_storage::LimiterPolicy;
    use vidscribe_test_utils::{transcript_payload, MemoryBackends, SAMPLE_VIDEO_IDS};

    fn targets(backends: &MemoryBackends, notifier: JobNotifier) -> ReaperTargets {
        ReaperTargets {
            queue: backends.queue.clone(),
            cache: backends.cache.clone(),
            limiter: backends.limiter.clone(),
            notifier,
            clock: Arc::new(backends.clock.clone()),
        }
    }

    #[test]
    fn test_config_from_worker_config() {
        let worker = WorkerConfig {
            reaper_interval: Duration::from_secs(7),
            ..WorkerConfig::default()
        };
        let config = LeaseReaperConfig::from(&worker);
        assert_eq!(config.check_interval, Duration::from_secs(7));
        assert_eq!(config.retention, Duration::from_secs(DEFAULT_JOB_RETENTION_SECS));
    }

    #[tokio::test]
    async fn test_reap_fails_exhausted_job_and_broadcasts() {
        let backends = MemoryBackends::new(
            LimiterPolicy::default(),
            QueueSettings::default()
                .with_max_deliveries(1)
                .with_lease_duration(Duration::from_secs(60)),
        );
        let notifier = JobNotifier::new(8);
        let mut events = notifier.subscribe();
        let targets = targets(&backends, notifier);
        let metrics = LeaseReaperMetrics::new();

        let job = backends
            .queue
            .enqueue(transcript_payload(SAMPLE_VIDEO_IDS[0]))
            .await
            .unwrap();
        backends.queue.dequeue("crashed").await.unwrap().unwrap();

        assert_eq!(reap_once(&targets, &metrics).await, 0);
        backends.clock.advance(Duration::from_secs(61));
        assert_eq!(reap_once(&targets, &metrics).await, 1);

        let failed = backends.queue.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert!(failed.error.unwrap().contains("lease expired"));

        let event = events.recv().await.unwrap();
        assert_eq!(event.job_id, job.id);
        assert_eq!(event.state, JobState::Failed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_reaped, 1);
        assert_eq!(snapshot.cycles, 2);
    }

    #[tokio::test]
    async fn test_purge_removes_old_jobs_and_expired_cache_rows() {
        let backends = MemoryBackends::default();
        let targets = targets(&backends, JobNotifier::new(8));
        let metrics = LeaseReaperMetrics::new();
        let config = LeaseReaperConfig {
            retention: Duration::from_secs(60),
            ..LeaseReaperConfig::default()
        };

        backends
            .queue
            .enqueue(transcript_payload(SAMPLE_VIDEO_IDS[0]))
            .await
            .unwrap();
        let (_, lease) = backends.queue.dequeue("w").await.unwrap().unwrap();
        backends
            .queue
            .complete(&lease, serde_json::json!("done"))
            .await
            .unwrap();
        backends
            .cache
            .set(
                &CacheKey::new("transcript", "old"),
                &serde_json::json!(1),
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            backends
                .limiter
                .limit(ip, &ResourceClass::CHAT)
                .await
                .unwrap();
        }

        backends.clock.advance(Duration::from_secs(120));
        purge_once(&targets, &config, &metrics).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_purged, 1);
        assert_eq!(snapshot.cache_entries_purged, 1);
        assert_eq!(snapshot.rate_windows_purged, 3);
        assert_eq!(snapshot.errors, 0);
        assert_eq!(backends.queue.stats().await.unwrap().total(), 0);
        assert!(backends.cache.is_empty());
        assert_eq!(backends.limiter.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_reap_with_global_registry_available() {
        assert!(telemetry::metrics().is_some());
        let backends = MemoryBackends::default();
        let targets = targets(&backends, JobNotifier::new(8));
        backends
            .queue
            .enqueue(transcript_payload(SAMPLE_VIDEO_IDS[1]))
            .await
            .unwrap();

        let reaper_metrics = LeaseReaperMetrics::new();
        assert_eq!(reap_once(&targets, &reaper_metrics).await, 0);
        assert_eq!(reaper_metrics.snapshot().cycles, 1);
        assert_eq!(reaper_metrics.snapshot().errors, 0);
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() {
        let backends = MemoryBackends::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(lease_reaper_task(
            targets(&backends, JobNotifier::new(8)),
            LeaseReaperConfig::development(),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        // Both intervals tick immediately on start.
        assert!(metrics.snapshot().cycles >= 1);
    }
}
