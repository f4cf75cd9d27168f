//! VIDSCRIBE Test Utilities
//!
//! Shared test infrastructure for the VIDSCRIBE workspace:
//! - [`ScriptedFetcher`]: an upstream double with scripted outcomes and a
//!   call counter
//! - Fixtures for payloads and wired in-memory backends on a manual clock
//! - Proptest generators for keys, payloads and quotas

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use vidscribe_core::{
    CacheKey, FetchError, Job, JobId, JobPayload, JobState, ManualClock, QueueSettings,
    RateQuota, ResourceClass, ResourceRef, RetryConfig, UpstreamFetcher,
};
pub use vidscribe_storage::{
    FailOpenCache, InMemoryJobQueue, InMemoryRateLimiter, InMemoryResultCache, JobQueue,
    LimiterPolicy, RateLimiter, ResultCache,
};

// ============================================================================
// SCRIPTED UPSTREAM
// ============================================================================

/// One scripted upstream outcome.
#[derive(Debug, Clone)]
pub enum Step {
    Ok(serde_json::Value),
    Err(FetchError),
    /// Sleep, then answer with the inner step.
    Delay(Duration, Box<Step>),
    /// Panic inside `fetch`.
    Panic,
}

/// Upstream double that replays scripted outcomes and counts calls.
///
/// Once the script is exhausted every call returns the fallback, which
/// defaults to echoing the payload's resource as `{"resource": ..., "text": ...}`.
#[derive(Debug, Clone)]
pub struct ScriptedFetcher {
    class: ResourceClass,
    script: Arc<Mutex<VecDeque<Step>>>,
    fallback: Option<Step>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedFetcher {
    pub fn new(class: ResourceClass) -> Self {
        Self {
            class,
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A transcript fetcher that always succeeds.
    pub fn transcripts() -> Self {
        Self::new(ResourceClass::TRANSCRIBE)
    }

    pub fn then(self, step: Step) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(step);
        self
    }

    pub fn then_ok(self, value: serde_json::Value) -> Self {
        self.then(Step::Ok(value))
    }

    pub fn then_err(self, error: FetchError) -> Self {
        self.then(Step::Err(error))
    }

    /// Answer every unscripted call with `step`.
    pub fn otherwise(mut self, step: Step) -> Self {
        self.fallback = Some(step);
        self
    }

    /// Number of `fetch` calls so far, across clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self, payload: &JobPayload) -> Step {
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        scripted
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| Step::Ok(echo(payload)))
    }
}

fn echo(payload: &JobPayload) -> serde_json::Value {
    serde_json::json!({
        "resource": payload.resource.to_string(),
        "text": format!("transcript of {}", payload.resource.resource_id),
    })
}

async fn play(step: Step) -> Result<serde_json::Value, FetchError> {
    let mut step = step;
    loop {
        match step {
            Step::Ok(value) => return Ok(value),
            Step::Err(error) => return Err(error),
            Step::Delay(delay, next) => {
                tokio::time::sleep(delay).await;
                step = *next;
            }
            Step::Panic => panic!("scripted upstream panic"),
        }
    }
}

#[async_trait]
impl UpstreamFetcher for ScriptedFetcher {
    fn class(&self) -> ResourceClass {
        self.class.clone()
    }

    async fn fetch(&self, payload: &JobPayload) -> Result<serde_json::Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.next_step(payload);
        play(step).await
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// An English transcript payload for `video_id`.
pub fn transcript_payload(video_id: &str) -> JobPayload {
    let url = format!("https://www.youtube.com/watch?v={}", video_id);
    JobPayload::transcript(video_id, "en", &url).unwrap_or_else(|e| panic!("bad fixture id: {e}"))
}

/// Canonical 11-character video ids.
pub const SAMPLE_VIDEO_IDS: [&str; 3] = ["dQw4w9WgXcQ", "9bZkp7q19f0", "kJQP7kiw5Fk"];

/// In-memory backends sharing one manual clock.
#[derive(Clone)]
pub struct MemoryBackends {
    pub clock: ManualClock,
    pub limiter: Arc<InMemoryRateLimiter>,
    pub cache: Arc<InMemoryResultCache>,
    pub queue: Arc<InMemoryJobQueue>,
}

impl MemoryBackends {
    pub fn new(policy: LimiterPolicy, settings: QueueSettings) -> Self {
        let clock = ManualClock::starting_now();
        let shared: Arc<dyn vidscribe_core::Clock> = Arc::new(clock.clone());
        Self {
            limiter: Arc::new(InMemoryRateLimiter::with_clock(policy, Arc::clone(&shared))),
            cache: Arc::new(InMemoryResultCache::with_clock(Arc::clone(&shared))),
            queue: Arc::new(InMemoryJobQueue::with_clock(settings, shared)),
            clock,
        }
    }
}

impl Default for MemoryBackends {
    fn default() -> Self {
        Self::new(LimiterPolicy::default(), QueueSettings::default())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// YouTube-shaped video id.
    pub fn arb_video_id() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_-]{11}"
    }

    /// Metadata resource of a video.
    pub fn arb_resource_ref() -> impl Strategy<Value = ResourceRef> {
        arb_video_id().prop_map(|id| {
            ResourceRef::new("video", id).unwrap_or_else(|e| panic!("generator produced {e}"))
        })
    }

    /// Transcript payloads in assorted languages, plus bare video lookups.
    pub fn arb_payload() -> impl Strategy<Value = JobPayload> {
        prop_oneof![
            3 => (arb_video_id(), "[a-z]{2}").prop_map(|(id, lang)| {
                JobPayload::transcript(&id, &lang, &id)
                    .unwrap_or_else(|e| panic!("generator produced {e}"))
            }),
            1 => arb_resource_ref().prop_map(|r| JobPayload::new(r, serde_json::json!({}))),
        ]
    }

    pub fn arb_quota() -> impl Strategy<Value = RateQuota> {
        (1u32..50, 1u64..600).prop_map(|(limit, secs)| RateQuota::new(limit, Duration::from_secs(secs)))
    }
}
