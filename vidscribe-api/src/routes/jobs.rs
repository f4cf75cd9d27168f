//! Job status and live job events.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use vidscribe_core::{Clock, Job, JobEvent, JobId};
use vidscribe_storage::JobQueue;

use crate::constants::{JOB_EVENTS_POLL_SECS, SSE_KEEP_ALIVE_SECS};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// A job record plus its queue position while waiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
}

async fn load_job(queue: &dyn JobQueue, job_id: JobId) -> ApiResult<Job> {
    queue
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job", job_id))
}

/// GET /api/v1/jobs/{job_id} - Get a job
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/jobs/{job_id}",
    tag = "Jobs",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job found", body = JobResponse),
        (status = 400, description = "Malformed job id", body = crate::error::ApiError),
        (status = 404, description = "Job not found", body = crate::error::ApiError),
    ),
))]
pub async fn get_job(
    State(queue): State<Arc<dyn JobQueue>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let job_id: JobId = job_id.parse()?;
    let job = load_job(queue.as_ref(), job_id).await?;
    let position = queue.position_in_queue(job_id).await?;
    Ok(Json(JobResponse { job, position }))
}

fn job_event(event: &JobEvent) -> Event {
    match Event::default().event("job").json_data(event) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode job event");
            Event::default().comment("encoding error")
        }
    }
}

enum Wake {
    Event(JobEvent),
    /// Re-read the store; `forced` emits even an unchanged state.
    Reread { forced: bool },
    Closed,
}

/// Stream a job's transitions, starting with its current state and ending
/// after a terminal one.
///
/// `rx` must be subscribed before `initial` was read so that no transition
/// falls between the two. Broadcasts only reach subscribers of this process,
/// so the job record is also re-read every `poll_every` and a changed state
/// is emitted; that covers jobs finished by a worker on another instance.
fn job_events(
    mut rx: broadcast::Receiver<JobEvent>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    initial: Job,
    poll_every: Duration,
) -> impl Stream<Item = JobEvent> {
    let job_id = initial.id;

    async_stream::stream! {
        let first = JobEvent::from_job(&initial, clock.now());
        let mut last_state = first.state;
        yield first;
        if last_state.is_terminal() {
            return;
        }

        let mut ticker = interval_at(Instant::now() + poll_every, poll_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) if event.job_id == job_id => Wake::Event(event),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(%job_id, skipped, "event subscriber lagged, re-reading job");
                        Wake::Reread { forced: true }
                    }
                    Err(RecvError::Closed) => Wake::Closed,
                },
                _ = ticker.tick() => Wake::Reread { forced: false },
            };

            let event = match wake {
                Wake::Event(event) => event,
                Wake::Closed => break,
                Wake::Reread { forced } => match queue.get_job(job_id).await {
                    Ok(Some(job)) if forced || job.state != last_state => {
                        JobEvent::from_job(&job, clock.now())
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(%job_id, error = %e, "job lookup failed during event stream");
                        continue;
                    }
                },
            };

            last_state = event.state;
            yield event;
            if last_state.is_terminal() {
                break;
            }
        }
    }
}

/// GET /api/v1/jobs/{job_id}/events - Server-sent job events
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/jobs/{job_id}/events",
    tag = "Jobs",
    params(("job_id" = String, Path, description = "Job id")),
    responses(
        (status = 200, description = "Stream of `job` events", content_type = "text/event-stream"),
        (status = 404, description = "Job not found", body = crate::error::ApiError),
    ),
))]
pub async fn job_events_stream(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let job_id: JobId = job_id.parse()?;
    let rx = state.notifier.subscribe();
    let job = load_job(state.queue.as_ref(), job_id).await?;
    let stream = job_events(
        rx,
        Arc::clone(&state.queue),
        Arc::clone(&state.clock),
        job,
        Duration::from_secs(JOB_EVENTS_POLL_SECS),
    )
    .map(|event| Ok::<_, Infallible>(job_event(&event)));
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS)),
    ))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/:job_id", get(get_job))
        .route("/:job_id/events", get(job_events_stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobNotifier;
    use vidscribe_core::{JobState, SystemClock};
    use vidscribe_test_utils::{transcript_payload, MemoryBackends, SAMPLE_VIDEO_IDS};

    const NO_POLL: Duration = Duration::from_secs(3600);

    fn states(events: &[JobEvent]) -> Vec<JobState> {
        events.iter().map(|e| e.state).collect()
    }

    #[tokio::test]
    async fn test_event_stream_ends_after_terminal_event() {
        let backends = MemoryBackends::default();
        let notifier = JobNotifier::new(16);
        let job = backends
            .queue
            .enqueue(transcript_payload(SAMPLE_VIDEO_IDS[0]))
            .await
            .unwrap();
        let other = backends
            .queue
            .enqueue(transcript_payload(SAMPLE_VIDEO_IDS[1]))
            .await
            .unwrap();

        let rx = notifier.subscribe();
        let stream = job_events(
            rx,
            backends.queue.clone(),
            Arc::new(SystemClock),
            job.clone(),
            NO_POLL,
        );

        for (record, state) in [
            (&other, JobState::Active),
            (&job, JobState::Active),
            (&job, JobState::Completed),
            (&job, JobState::Failed),
        ] {
            let mut record = record.clone();
            record.state = state;
            notifier.publish(JobEvent::from_job(&record, chrono::Utc::now()));
        }

        let events: Vec<_> = tokio::time::timeout(Duration::from_secs(2), stream.collect())
            .await
            .unwrap();
        // The unrelated job and anything after the terminal event are not
        // delivered.
        assert_eq!(
            states(&events),
            vec![JobState::Waiting, JobState::Active, JobState::Completed]
        );
    }

    #[tokio::test]
    async fn test_event_stream_for_finished_job_is_single_event() {
        let backends = MemoryBackends::default();
        let notifier = JobNotifier::new(16);
        let mut job = backends
            .queue
            .enqueue(transcript_payload(SAMPLE_VIDEO_IDS[0]))
            .await
            .unwrap();
        job.state = JobState::Completed;

        let stream = job_events(
            notifier.subscribe(),
            backends.queue.clone(),
            Arc::new(SystemClock),
            job,
            NO_POLL,
        );
        let events: Vec<_> = stream.collect().await;
        assert_eq!(states(&events), vec![JobState::Completed]);
    }

    #[tokio::test]
    async fn test_event_stream_sees_completion_published_elsewhere() {
        // Two instances share one store; each has its own notifier.
        let backends = MemoryBackends::default();
        let here = JobNotifier::new(16);
        let elsewhere = JobNotifier::new(16);
        let job = backends
            .queue
            .enqueue(transcript_payload(SAMPLE_VIDEO_IDS[0]))
            .await
            .unwrap();

        let stream = job_events(
            here.subscribe(),
            backends.queue.clone(),
            Arc::new(SystemClock),
            job.clone(),
            Duration::from_millis(20),
        );

        let (_, lease) = backends.queue.dequeue("remote-worker").await.unwrap().unwrap();
        let done = backends
            .queue
            .complete(&lease, serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        elsewhere.publish(JobEvent::from_job(&done, chrono::Utc::now()));

        let events: Vec<_> = tokio::time::timeout(Duration::from_secs(2), stream.collect())
            .await
            .expect("stream should end once the stored job is terminal");
        assert_eq!(
            states(&events),
            vec![JobState::Waiting, JobState::Completed]
        );
        assert_eq!(events[1].job_id, job.id);
    }

    #[tokio::test]
    async fn test_event_stream_ends_when_job_is_purged() {
        let backends = MemoryBackends::default();
        let notifier = JobNotifier::new(16);
        let mut job = backends
            .queue
            .enqueue(transcript_payload(SAMPLE_VIDEO_IDS[0]))
            .await
            .unwrap();
        job.id = vidscribe_core::JobId::new();

        let stream = job_events(
            notifier.subscribe(),
            backends.queue.clone(),
            Arc::new(SystemClock),
            job,
            Duration::from_millis(20),
        );
        let events: Vec<_> = tokio::time::timeout(Duration::from_secs(2), stream.collect())
            .await
            .unwrap();
        assert_eq!(states(&events), vec![JobState::Waiting]);
    }
}
