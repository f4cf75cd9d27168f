//! In-process job queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;
use vidscribe_core::{
    chrono_duration, Clock, Job, JobId, JobPayload, JobState, Lease, QueueError, QueueSettings,
    QueueStats, SystemClock,
};

use super::traits::{lease_exhausted_message, JobQueue};

#[derive(Debug)]
struct HeldLease {
    token: Uuid,
    worker_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    job: Job,
    seq: u64,
    lease: Option<HeldLease>,
}

impl Entry {
    fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.job.state == JobState::Active
            && self.lease.as_ref().is_some_and(|l| l.expires_at <= now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Entry>,
    /// seq -> id for waiting jobs only.
    waiting: BTreeMap<u64, JobId>,
    next_seq: u64,
}

impl Inner {
    /// Entry holding `lease`, or the reason it cannot be used. A lease past
    /// its expiry is lost even if nobody has taken the job over yet.
    fn leased_mut(&mut self, lease: &Lease, now: DateTime<Utc>) -> Result<&mut Entry, QueueError> {
        let entry = self
            .jobs
            .get_mut(&lease.job_id)
            .ok_or(QueueError::JobNotFound {
                job_id: lease.job_id,
            })?;
        let holds = entry.job.state == JobState::Active
            && entry.lease.as_ref().is_some_and(|l| l.token == lease.token)
            && !entry.lease_expired(now);
        if !holds {
            return Err(QueueError::LeaseLost {
                job_id: lease.job_id,
            });
        }
        Ok(entry)
    }
}

/// Job queue for a single process. State is lost on restart.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    settings: QueueSettings,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl InMemoryJobQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: QueueSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    fn finalize(
        &self,
        entry: &mut Entry,
        state: JobState,
        now: DateTime<Utc>,
    ) -> Result<Job, QueueError> {
        if !entry.job.state.can_transition_to(state) {
            return Err(QueueError::InvalidTransition {
                job_id: entry.job.id,
                from: entry.job.state,
                to: state,
            });
        }
        entry.job.state = state;
        entry.job.finished_at = Some(now);
        entry.lease = None;
        Ok(entry.job.clone())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    async fn enqueue(&self, payload: JobPayload) -> Result<Job, QueueError> {
        let job = Job::new(self.settings.name.clone(), payload, self.clock.now());
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.waiting.insert(seq, job.id);
        inner.jobs.insert(
            job.id,
            Entry {
                job: job.clone(),
                seq,
                lease: None,
            },
        );
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&id).map(|e| e.job.clone()))
    }

    async fn position_in_queue(&self, id: JobId) -> Result<Option<u64>, QueueError> {
        let inner = self.inner.lock().await;
        let Some(entry) = inner.jobs.get(&id) else {
            return Ok(None);
        };
        if entry.job.state != JobState::Waiting {
            return Ok(None);
        }
        Ok(Some(inner.waiting.range(..=entry.seq).count() as u64))
    }

    async fn waiting_count(&self) -> Result<u64, QueueError> {
        Ok(self.inner.lock().await.waiting.len() as u64)
    }

    async fn dequeue(&self, worker_id: &str) -> Result<Option<(Job, Lease)>, QueueError> {
        let now = self.clock.now();
        let max_deliveries = self.settings.max_deliveries;
        let mut inner = self.inner.lock().await;

        let first_waiting = inner.waiting.iter().next().map(|(&seq, &id)| (seq, id));
        let first_redelivery = inner
            .jobs
            .values()
            .filter(|e| e.lease_expired(now) && e.job.attempts < max_deliveries)
            .map(|e| (e.seq, e.job.id))
            .min();

        let next = match (first_waiting, first_redelivery) {
            (Some(w), Some(r)) => Some(w.min(r)),
            (w, r) => w.or(r),
        };
        let Some((seq, id)) = next else {
            return Ok(None);
        };

        inner.waiting.remove(&seq);
        let entry = inner.jobs.get_mut(&id).ok_or(QueueError::Corrupt {
            reason: format!("waiting index references missing job {}", id),
        })?;

        if entry.lease.is_some() {
            tracing::warn!(job_id = %id, attempt = entry.job.attempts + 1, "redelivering job after lease expiry");
        }

        let token = Uuid::now_v7();
        let expires_at = now + chrono_duration(self.settings.lease_duration);
        entry.job.state = JobState::Active;
        entry.job.attempts += 1;
        entry.job.started_at = Some(now);
        entry.lease = Some(HeldLease {
            token,
            worker_id: worker_id.to_string(),
            expires_at,
        });

        let lease = Lease {
            job_id: id,
            token,
            worker_id: worker_id.to_string(),
            attempt: entry.job.attempts,
            expires_at,
        };
        Ok(Some((entry.job.clone(), lease)))
    }

    async fn renew_lease(&self, lease: &Lease) -> Result<Lease, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let entry = inner.leased_mut(lease, now)?;
        let expires_at = now + chrono_duration(self.settings.lease_duration);
        let held = entry.lease.as_mut().ok_or(QueueError::LeaseLost {
            job_id: lease.job_id,
        })?;
        held.expires_at = expires_at;
        Ok(Lease {
            job_id: lease.job_id,
            token: held.token,
            worker_id: held.worker_id.clone(),
            attempt: entry.job.attempts,
            expires_at,
        })
    }

    async fn complete(&self, lease: &Lease, result: serde_json::Value) -> Result<Job, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let entry = inner.leased_mut(lease, now)?;
        entry.job.result = Some(result);
        self.finalize(entry, JobState::Completed, now)
    }

    async fn fail(&self, lease: &Lease, error: &str) -> Result<Job, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let entry = inner.leased_mut(lease, now)?;
        entry.job.error = Some(error.to_string());
        self.finalize(entry, JobState::Failed, now)
    }

    async fn reap_expired(&self) -> Result<Vec<Job>, QueueError> {
        let now = self.clock.now();
        let max_deliveries = self.settings.max_deliveries;
        let mut inner = self.inner.lock().await;

        let mut reaped = Vec::new();
        for entry in inner.jobs.values_mut() {
            if entry.lease_expired(now) && entry.job.attempts >= max_deliveries {
                entry.job.error = Some(lease_exhausted_message(entry.job.attempts));
                reaped.push(self.finalize(entry, JobState::Failed, now)?);
            }
        }
        Ok(reaped)
    }

    async fn purge_finished(&self, older_than: Duration) -> Result<u64, QueueError> {
        let cutoff = self.clock.now() - chrono_duration(older_than);
        let mut inner = self.inner.lock().await;
        let before = inner.jobs.len();
        inner.jobs.retain(|_, e| {
            !(e.job.is_terminal() && e.job.finished_at.is_some_and(|at| at <= cutoff))
        });
        Ok(before.saturating_sub(inner.jobs.len()) as u64)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();
        for entry in inner.jobs.values() {
            match entry.job.state {
                JobState::Waiting => stats.waiting += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
