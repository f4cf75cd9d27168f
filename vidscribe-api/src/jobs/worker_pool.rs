//! Worker Pool
//!
//! A fixed number of Tokio tasks that drain the job queue. Each worker holds
//! at most one job at a time:
//!
//! 1. `dequeue` claims the oldest deliverable job under an exclusive lease.
//! 2. The upstream fetch runs under `job_timeout`; a panic inside it is
//!    caught and recorded as a failure.
//! 3. Transient errors are retried with exponential backoff, renewing the
//!    lease before each retry. Permanent errors fail the job at once.
//! 4. The job is finalized with the lease token. A completed result is then
//!    written to the result cache.
//!
//! A worker whose lease was taken over by a redelivery discards its outcome.
//! Workers stop between jobs when the shutdown signal flips.

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;
use vidscribe_core::{
    Clock, FetchError, Job, JobEvent, JobPayload, Lease, QueueError, UpstreamFetcher,
};
use vidscribe_storage::{FailOpenCache, JobQueue};

use crate::config::WorkerConfig;
use crate::jobs::JobNotifier;
use crate::telemetry::metrics;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for one worker pool since startup.
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Deliveries picked up
    pub processed: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    /// Transient failures that were retried
    pub retries: AtomicU64,
    /// Outcomes discarded because the lease was lost
    pub lease_lost: AtomicU64,
}

impl WorkerPoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> WorkerPoolSnapshot {
        WorkerPoolSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            lease_lost: self.lease_lost.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pool metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerPoolSnapshot {
    pub processed: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
    pub lease_lost: u64,
}

// ============================================================================
// POOL
// ============================================================================

/// Why one fetch attempt produced no value.
enum AttemptError {
    Fetch(FetchError),
    Panicked(String),
}

impl AttemptError {
    fn is_transient(&self) -> bool {
        matches!(self, AttemptError::Fetch(e) if e.is_transient())
    }

    fn message(&self) -> String {
        match self {
            AttemptError::Fetch(e) => e.to_string(),
            AttemptError::Panicked(msg) => format!("worker panicked: {}", msg),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Consumers of one job queue.
#[derive(Clone)]
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    cache: Arc<FailOpenCache>,
    fetcher: Arc<dyn UpstreamFetcher>,
    notifier: JobNotifier,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
    metrics: Arc<WorkerPoolMetrics>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        cache: Arc<FailOpenCache>,
        fetcher: Arc<dyn UpstreamFetcher>,
        notifier: JobNotifier,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            cache,
            fetcher,
            notifier,
            clock,
            config,
            metrics: Arc::new(WorkerPoolMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<WorkerPoolMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Spawn `concurrency` worker tasks.
    pub fn spawn(&self, shutdown_rx: watch::Receiver<bool>) -> WorkerPoolHandle {
        let handles = (0..self.config.concurrency)
            .map(|n| {
                let pool = self.clone();
                let worker_id = format!("{}-worker-{}", self.queue.name(), n);
                tokio::spawn(pool.worker_loop(worker_id, shutdown_rx.clone()))
            })
            .collect();

        tracing::info!(
            queue = self.queue.name(),
            concurrency = self.config.concurrency,
            job_timeout_secs = self.config.job_timeout.as_secs(),
            max_retries = self.config.retry.max_retries,
            "Worker pool started"
        );

        WorkerPoolHandle {
            handles,
            metrics: self.metrics(),
        }
    }

    async fn worker_loop(self, worker_id: String, mut shutdown_rx: watch::Receiver<bool>) {
        let waker = self.notifier.waker();
        tracing::debug!(worker_id = %worker_id, "worker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.run_once(&worker_id).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(worker_id = %worker_id, error = %e, "dequeue failed");
                }
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = waker.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::debug!(worker_id = %worker_id, "worker stopped");
    }

    /// Claim and process at most one job. Returns whether a job was found.
    pub async fn run_once(&self, worker_id: &str) -> Result<bool, QueueError> {
        let Some((job, lease)) = self.queue.dequeue(worker_id).await? else {
            return Ok(false);
        };

        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            resource = %job.payload.resource,
            attempt = lease.attempt,
            worker_id = %worker_id,
        );
        self.process(job, lease).instrument(span).await;
        Ok(true)
    }

    async fn attempt(&self, payload: &JobPayload) -> Result<serde_json::Value, AttemptError> {
        let call = AssertUnwindSafe(self.fetcher.fetch(payload)).catch_unwind();
        match tokio::time::timeout(self.config.job_timeout, call).await {
            Ok(Ok(result)) => result.map_err(AttemptError::Fetch),
            Ok(Err(panic)) => Err(AttemptError::Panicked(panic_message(panic.as_ref()))),
            Err(_) => Err(AttemptError::Fetch(FetchError::Timeout {
                after: self.config.job_timeout,
            })),
        }
    }

    async fn process(&self, job: Job, mut lease: Lease) {
        let started = Instant::now();
        self.metrics.processed.fetch_add(1, Ordering::Relaxed);
        self.notifier.publish(JobEvent::from_job(&job, self.clock.now()));

        let mut retry = 0;
        let outcome = loop {
            let err = match self.attempt(&job.payload).await {
                Ok(value) => break Ok(value),
                Err(err) => err,
            };
            if !err.is_transient() {
                break Err(err.message());
            }
            let Some(delay) = self.config.retry.backoff_for(retry) else {
                break Err(err.message());
            };

            retry += 1;
            self.metrics.retries.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                error = %err.message(),
                retry,
                delay_ms = delay.as_millis() as u64,
                "transient upstream failure, retrying"
            );
            tokio::time::sleep(delay).await;

            match self.queue.renew_lease(&lease).await {
                Ok(renewed) => lease = renewed,
                Err(QueueError::LeaseLost { .. }) => {
                    self.lease_lost(started.elapsed());
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "lease renewal failed, continuing on current lease");
                }
            }
        };

        // The store would refuse it too; skip the round trip.
        if lease.is_expired(self.clock.now()) {
            self.lease_lost(started.elapsed());
            return;
        }

        let finalized = match &outcome {
            Ok(value) => self.queue.complete(&lease, value.clone()).await,
            Err(message) => self.queue.fail(&lease, message).await,
        };

        match finalized {
            Ok(job) => {
                let elapsed = started.elapsed();
                if let Ok(value) = &outcome {
                    self.metrics.completed.fetch_add(1, Ordering::Relaxed);
                    self.cache.put(&job.payload.cache_key(), value).await;
                    record("completed", elapsed);
                    tracing::info!(duration_ms = elapsed.as_millis() as u64, "job completed");
                } else {
                    self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                    record("failed", elapsed);
                    tracing::warn!(error = ?job.error, "job failed");
                }
                self.notifier.publish(JobEvent::from_job(&job, self.clock.now()));
            }
            Err(QueueError::LeaseLost { .. }) => self.lease_lost(started.elapsed()),
            Err(e) => {
                // The lease will expire and the reaper or a redelivery takes over.
                tracing::error!(error = %e, "failed to finalize job");
            }
        }
    }

    fn lease_lost(&self, elapsed: Duration) {
        self.metrics.lease_lost.fetch_add(1, Ordering::Relaxed);
        record("lease_lost", elapsed);
        tracing::warn!("lease lost, discarding outcome");
    }
}

fn record(outcome: &str, elapsed: Duration) {
    if let Some(m) = metrics() {
        m.record_job(outcome, elapsed.as_secs_f64());
    }
}

/// Join handles of a running pool.
pub struct WorkerPoolHandle {
    handles: Vec<JoinHandle<()>>,
    metrics: Arc<WorkerPoolMetrics>,
}

impl WorkerPoolHandle {
    /// Wait for every worker to exit and log the final counters.
    pub async fn join(self) -> WorkerPoolSnapshot {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task aborted");
            }
        }
        let snapshot = self.metrics.snapshot();
        tracing::info!(
            processed = snapshot.processed,
            completed = snapshot.completed,
            failed = snapshot.failed,
            retries = snapshot.retries,
            lease_lost = snapshot.lease_lost,
            "Worker pool stopped"
        );
        snapshot
    }
}
