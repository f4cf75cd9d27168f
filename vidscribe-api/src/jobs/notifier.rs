//! In-process job notifications.

use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use vidscribe_core::JobEvent;

use crate::constants::JOB_EVENT_CHANNEL_CAPACITY;

/// Broadcasts job transitions to SSE subscribers and wakes idle workers.
///
/// Events are best effort: a lagging subscriber loses the oldest events and
/// can always fall back to reading the job record.
#[derive(Clone)]
pub struct JobNotifier {
    events: broadcast::Sender<JobEvent>,
    wake: Arc<Notify>,
}

impl JobNotifier {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            events,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Publish a transition. Having no subscribers is not an error.
    pub fn publish(&self, event: JobEvent) {
        tracing::trace!(job_id = %event.job_id, state = %event.state, "job event");
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Wake one idle worker. The permit is kept if none is waiting.
    pub fn wake_worker(&self) {
        self.wake.notify_one();
    }

    pub(crate) fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }
}

impl Default for JobNotifier {
    fn default() -> Self {
        Self::new(JOB_EVENT_CHANNEL_CAPACITY)
    }
}

impl std::fmt::Debug for JobNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobNotifier")
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}
