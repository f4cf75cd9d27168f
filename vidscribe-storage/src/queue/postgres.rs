//! Shared job queue in PostgreSQL.
//!
//! Dispatch uses `FOR UPDATE SKIP LOCKED`, so any number of workers across
//! instances can poll concurrently without handing the same delivery to two
//! of them. Lease tokens are checked in the `WHERE` clause of every
//! finalizing update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use std::time::Duration;
use tokio_postgres::Row;
use uuid::Uuid;
use vidscribe_core::{
    Job, JobId, JobPayload, JobState, Lease, QueueError, QueueSettings, QueueStats,
};

use super::traits::JobQueue;
use crate::pg::{millis, queue_unavailable};

const JOB_COLUMNS: &str = "job_id, queue_name, payload, state, result, error, attempts, \
     enqueued_at, started_at, finished_at";

/// [`JobQueue`] over the `vidscribe_jobs` table.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: Pool,
    settings: QueueSettings,
}

impl PgJobQueue {
    pub fn new(pool: Pool, settings: QueueSettings) -> Self {
        Self { pool, settings }
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, QueueError> {
        self.pool.get().await.map_err(queue_unavailable)
    }

    /// Tell a lost lease apart from a missing job after a guarded update
    /// matched nothing.
    async fn lease_failure(&self, lease: &Lease) -> QueueError {
        match self.get_job(lease.job_id).await {
            Ok(Some(_)) => QueueError::LeaseLost {
                job_id: lease.job_id,
            },
            Ok(None) => QueueError::JobNotFound {
                job_id: lease.job_id,
            },
            Err(e) => e,
        }
    }
}

fn job_from_row(row: &Row) -> Result<Job, QueueError> {
    let corrupt = |e: &dyn std::fmt::Display| QueueError::Corrupt {
        reason: e.to_string(),
    };

    let payload: serde_json::Value = row.try_get("payload").map_err(|e| corrupt(&e))?;
    let payload: JobPayload = serde_json::from_value(payload).map_err(|e| corrupt(&e))?;
    let state: String = row.try_get("state").map_err(|e| corrupt(&e))?;
    let state: JobState = state.parse().map_err(|e| corrupt(&e))?;
    let attempts: i32 = row.try_get("attempts").map_err(|e| corrupt(&e))?;

    Ok(Job {
        id: JobId::from_uuid(row.try_get("job_id").map_err(|e| corrupt(&e))?),
        queue: row.try_get("queue_name").map_err(|e| corrupt(&e))?,
        payload,
        state,
        result: row.try_get("result").map_err(|e| corrupt(&e))?,
        error: row.try_get("error").map_err(|e| corrupt(&e))?,
        attempts: u32::try_from(attempts).unwrap_or(0),
        enqueued_at: row.try_get("enqueued_at").map_err(|e| corrupt(&e))?,
        started_at: row.try_get("started_at").map_err(|e| corrupt(&e))?,
        finished_at: row.try_get("finished_at").map_err(|e| corrupt(&e))?,
    })
}

fn lease_from_row(row: &Row, job: &Job) -> Result<Lease, QueueError> {
    let corrupt = |e: tokio_postgres::Error| QueueError::Corrupt {
        reason: e.to_string(),
    };
    Ok(Lease {
        job_id: job.id,
        token: row.try_get::<_, Uuid>("lease_token").map_err(corrupt)?,
        worker_id: row.try_get("worker_id").map_err(corrupt)?,
        attempt: job.attempts,
        expires_at: row
            .try_get::<_, DateTime<Utc>>("lease_expires_at")
            .map_err(corrupt)?,
    })
}

fn i32_of(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

#[async_trait]
impl JobQueue for PgJobQueue {
    fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    async fn enqueue(&self, payload: JobPayload) -> Result<Job, QueueError> {
        let body = serde_json::to_value(&payload).map_err(|e| QueueError::Corrupt {
            reason: e.to_string(),
        })?;
        let id = JobId::new();
        let sql = format!(
            "INSERT INTO vidscribe_jobs (job_id, queue_name, payload) \
             VALUES ($1, $2, $3) RETURNING {}",
            JOB_COLUMNS
        );
        let client = self.client().await?;
        let row = client
            .query_one(&sql, &[&id.as_uuid(), &self.settings.name, &body])
            .await
            .map_err(queue_unavailable)?;
        job_from_row(&row)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        let sql = format!(
            "SELECT {} FROM vidscribe_jobs WHERE queue_name = $1 AND job_id = $2",
            JOB_COLUMNS
        );
        let client = self.client().await?;
        let row = client
            .query_opt(&sql, &[&self.settings.name, &id.as_uuid()])
            .await
            .map_err(queue_unavailable)?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn position_in_queue(&self, id: JobId) -> Result<Option<u64>, QueueError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT (SELECT count(*) FROM vidscribe_jobs w \
                         WHERE w.queue_name = j.queue_name \
                           AND w.state = 'waiting' AND w.seq <= j.seq) \
                 FROM vidscribe_jobs j \
                 WHERE j.queue_name = $1 AND j.job_id = $2 AND j.state = 'waiting'",
                &[&self.settings.name, &id.as_uuid()],
            )
            .await
            .map_err(queue_unavailable)?;
        Ok(row.map(|r| r.get::<_, i64>(0).max(0) as u64))
    }

    async fn waiting_count(&self) -> Result<u64, QueueError> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT count(*) FROM vidscribe_jobs WHERE queue_name = $1 AND state = 'waiting'",
                &[&self.settings.name],
            )
            .await
            .map_err(queue_unavailable)?;
        Ok(row.get::<_, i64>(0).max(0) as u64)
    }

    async fn dequeue(&self, worker_id: &str) -> Result<Option<(Job, Lease)>, QueueError> {
        let sql = format!(
            "WITH next AS ( \
                 SELECT job_id FROM vidscribe_jobs \
                 WHERE queue_name = $1 \
                   AND (state = 'waiting' \
                        OR (state = 'active' AND lease_expires_at <= now() AND attempts < $3)) \
                 ORDER BY seq \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE vidscribe_jobs j \
             SET state = 'active', attempts = j.attempts + 1, worker_id = $2, \
                 lease_token = $4, \
                 lease_expires_at = now() + ($5::bigint * interval '1 millisecond'), \
                 started_at = now() \
             FROM next WHERE j.job_id = next.job_id \
             RETURNING {}, j.lease_token, j.worker_id, j.lease_expires_at",
            JOB_COLUMNS
                .split(", ")
                .map(|c| format!("j.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let client = self.client().await?;
        let row = client
            .query_opt(
                &sql,
                &[
                    &self.settings.name,
                    &worker_id,
                    &i32_of(self.settings.max_deliveries),
                    &Uuid::now_v7(),
                    &millis(self.settings.lease_duration),
                ],
            )
            .await
            .map_err(queue_unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let job = job_from_row(&row)?;
        let lease = lease_from_row(&row, &job)?;
        if job.attempts > 1 {
            tracing::warn!(job_id = %job.id, attempt = job.attempts, "redelivering job after lease expiry");
        }
        Ok(Some((job, lease)))
    }

    async fn renew_lease(&self, lease: &Lease) -> Result<Lease, QueueError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "UPDATE vidscribe_jobs \
                 SET lease_expires_at = now() + ($3::bigint * interval '1 millisecond') \
                 WHERE job_id = $1 AND lease_token = $2 AND state = 'active' \
                   AND lease_expires_at > now() \
                 RETURNING lease_expires_at",
                &[
                    &lease.job_id.as_uuid(),
                    &lease.token,
                    &millis(self.settings.lease_duration),
                ],
            )
            .await
            .map_err(queue_unavailable)?;

        match row {
            Some(row) => Ok(Lease {
                expires_at: row.get(0),
                ..lease.clone()
            }),
            None => Err(self.lease_failure(lease).await),
        }
    }

    async fn complete(&self, lease: &Lease, result: serde_json::Value) -> Result<Job, QueueError> {
        let sql = format!(
            "UPDATE vidscribe_jobs \
             SET state = 'completed', result = $3, finished_at = now(), \
                 lease_token = NULL, lease_expires_at = NULL \
             WHERE job_id = $1 AND lease_token = $2 AND state = 'active' \
               AND lease_expires_at > now() \
             RETURNING {}",
            JOB_COLUMNS
        );
        let client = self.client().await?;
        let row = client
            .query_opt(&sql, &[&lease.job_id.as_uuid(), &lease.token, &result])
            .await
            .map_err(queue_unavailable)?;
        match row {
            Some(row) => job_from_row(&row),
            None => Err(self.lease_failure(lease).await),
        }
    }

    async fn fail(&self, lease: &Lease, error: &str) -> Result<Job, QueueError> {
        let sql = format!(
            "UPDATE vidscribe_jobs \
             SET state = 'failed', error = $3, finished_at = now(), \
                 lease_token = NULL, lease_expires_at = NULL \
             WHERE job_id = $1 AND lease_token = $2 AND state = 'active' \
               AND lease_expires_at > now() \
             RETURNING {}",
            JOB_COLUMNS
        );
        let client = self.client().await?;
        let row = client
            .query_opt(&sql, &[&lease.job_id.as_uuid(), &lease.token, &error])
            .await
            .map_err(queue_unavailable)?;
        match row {
            Some(row) => job_from_row(&row),
            None => Err(self.lease_failure(lease).await),
        }
    }

    async fn reap_expired(&self) -> Result<Vec<Job>, QueueError> {
        let sql = format!(
            "UPDATE vidscribe_jobs \
             SET state = 'failed', \
                 error = 'lease expired after ' || attempts || ' deliveries', \
                 finished_at = now(), lease_token = NULL, lease_expires_at = NULL \
             WHERE queue_name = $1 AND state = 'active' \
               AND lease_expires_at <= now() AND attempts >= $2 \
             RETURNING {}",
            JOB_COLUMNS
        );
        let client = self.client().await?;
        let rows = client
            .query(&sql, &[&self.settings.name, &i32_of(self.settings.max_deliveries)])
            .await
            .map_err(queue_unavailable)?;
        rows.iter().map(job_from_row).collect()
    }

    async fn purge_finished(&self, older_than: Duration) -> Result<u64, QueueError> {
        let client = self.client().await?;
        client
            .execute(
                "DELETE FROM vidscribe_jobs \
                 WHERE queue_name = $1 AND state IN ('completed', 'failed') \
                   AND finished_at <= now() - ($2::bigint * interval '1 millisecond')",
                &[&self.settings.name, &millis(older_than)],
            )
            .await
            .map_err(queue_unavailable)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT state, count(*) FROM vidscribe_jobs WHERE queue_name = $1 GROUP BY state",
                &[&self.settings.name],
            )
            .await
            .map_err(queue_unavailable)?;

        let mut stats = QueueStats::default();
        for row in rows {
            let state: String = row.get(0);
            let count = row.get::<_, i64>(1).max(0) as u64;
            match state.parse::<JobState>() {
                Ok(JobState::Waiting) => stats.waiting = count,
                Ok(JobState::Active) => stats.active = count,
                Ok(JobState::Completed) => stats.completed = count,
                Ok(JobState::Failed) => stats.failed = count,
                Err(e) => tracing::warn!(error = %e, "ignoring unknown job state in stats"),
            }
        }
        Ok(stats)
    }
}

impl std::fmt::Debug for PgJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgJobQueue")
            .field("settings", &self.settings)
            .finish()
    }
}
