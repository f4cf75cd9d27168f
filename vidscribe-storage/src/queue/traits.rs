//! Job queue trait.

use async_trait::async_trait;
use std::time::Duration;
use vidscribe_core::{Job, JobId, JobPayload, Lease, QueueError, QueueSettings, QueueStats};

/// A named, durable FIFO of jobs shared by API instances and workers.
///
/// # Ordering
///
/// Jobs are delivered in enqueue order. Expired-lease jobs that are still
/// eligible for redelivery compete by their original enqueue position.
///
/// # Leases
///
/// Every state-changing call after `dequeue` takes the [`Lease`] returned by
/// it. A lease whose token no longer matches the stored one (because it
/// expired and the job was redelivered, or the job was already finalized)
/// yields [`QueueError::LeaseLost`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    fn settings(&self) -> &QueueSettings;

    /// Queue name.
    fn name(&self) -> &str {
        &self.settings().name
    }

    /// Persist a new waiting job and return it.
    async fn enqueue(&self, payload: JobPayload) -> Result<Job, QueueError>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, QueueError>;

    /// 1-based position among waiting jobs, or `None` when the job is not
    /// waiting (or unknown).
    async fn position_in_queue(&self, id: JobId) -> Result<Option<u64>, QueueError>;

    async fn waiting_count(&self) -> Result<u64, QueueError>;

    /// True when more jobs are waiting than the configured threshold.
    async fn is_overloaded(&self) -> Result<bool, QueueError> {
        Ok(self.waiting_count().await? > self.settings().overload_threshold)
    }

    /// Claim the next deliverable job for `worker_id`.
    async fn dequeue(&self, worker_id: &str) -> Result<Option<(Job, Lease)>, QueueError>;

    /// Extend a held lease by the configured lease duration.
    async fn renew_lease(&self, lease: &Lease) -> Result<Lease, QueueError>;

    /// Finalize a job as completed with its result.
    async fn complete(&self, lease: &Lease, result: serde_json::Value) -> Result<Job, QueueError>;

    /// Finalize a job as failed with an error description.
    async fn fail(&self, lease: &Lease, error: &str) -> Result<Job, QueueError>;

    /// Fail active jobs whose lease expired after their last allowed
    /// delivery. Returns the jobs that were failed.
    async fn reap_expired(&self) -> Result<Vec<Job>, QueueError>;

    /// Delete terminal jobs that finished more than `older_than` ago.
    async fn purge_finished(&self, older_than: Duration) -> Result<u64, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;
}

/// Error message recorded on jobs failed by the reaper.
pub fn lease_exhausted_message(deliveries: u32) -> String {
    format!("lease expired after {} deliveries", deliveries)
}
