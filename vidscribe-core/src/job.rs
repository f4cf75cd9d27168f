//! Job records, leases and lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::keys::{CacheKey, ResourceRef};

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Job identifier using UUIDv7, so ids sort by enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Lifecycle state of a job.
///
/// ```text
/// waiting --dequeue--> active --success--> completed
///                        |  \--error----> failed
///                        \--lease expired, redelivered--> active
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Completed and failed jobs are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Forward-only transitions. `Active -> Active` is a redelivery after
    /// lease expiry.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Waiting, JobState::Active)
                | (JobState::Active, JobState::Active)
                | (JobState::Active, JobState::Completed)
                | (JobState::Active, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(ValidationError::InvalidValue {
                field: "state".to_string(),
                reason: format!("unknown job state '{}'", other),
            }),
        }
    }
}

// ============================================================================
// JOB RECORD
// ============================================================================

/// Input parameters of an expensive operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct JobPayload {
    /// The logical resource the job computes; its completion is cached under
    /// this identity.
    pub resource: ResourceRef,
    /// Opaque fetch parameters (source URL, language, ...).
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub params: serde_json::Value,
}

impl JobPayload {
    pub fn new(resource: ResourceRef, params: serde_json::Value) -> Self {
        Self { resource, params }
    }

    pub fn cache_key(&self) -> CacheKey {
        self.resource.cache_key()
    }

    /// Read a string parameter.
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(|v| v.as_str())
    }

    /// A transcript request for `video_id` in `lang`.
    ///
    /// Transcripts differ per language, so the resource id (and with it the
    /// cache key) is `<video_id>.<lang>`. Video ids never contain a dot.
    pub fn transcript(video_id: &str, lang: &str, url: &str) -> Result<Self, ValidationError> {
        let lang = lang.trim().to_ascii_lowercase();
        let resource = ResourceRef::new(TRANSCRIPT_RESOURCE, format!("{}.{}", video_id, lang))?;
        Ok(Self::new(
            resource,
            serde_json::json!({ "url": url, "lang": lang, "video_id": video_id }),
        ))
    }

    /// The video this payload refers to: the `video_id` parameter, else the
    /// resource id up to the first dot.
    pub fn video_id(&self) -> &str {
        self.param_str("video_id").unwrap_or_else(|| {
            let id = self.resource.resource_id.as_str();
            id.split_once('.').map_or(id, |(video, _)| video)
        })
    }
}

/// Resource type of transcript jobs.
pub const TRANSCRIPT_RESOURCE: &str = "transcript";

/// A unit of queued work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub payload: JobPayload,
    pub state: JobState,
    /// Present only when `state = completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub result: Option<serde_json::Value>,
    /// Present only when `state = failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of deliveries (lease acquisitions) so far.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A freshly enqueued job.
    pub fn new(queue: impl Into<String>, payload: JobPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            queue: queue.into(),
            payload,
            state: JobState::Waiting,
            result: None,
            error: None,
            attempts: 0,
            enqueued_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

// ============================================================================
// LEASES
// ============================================================================

/// Time-bounded exclusive claim a worker holds on an active job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub job_id: JobId,
    /// Unique per delivery; a stale token cannot finalize the job.
    pub token: Uuid,
    pub worker_id: String,
    /// Delivery number this lease belongs to (1-based).
    pub attempt: u32,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ============================================================================
// QUEUE VIEWS
// ============================================================================

/// Count of jobs per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed
    }
}

/// Notification emitted on every job state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct JobEvent {
    pub job_id: JobId,
    pub state: JobState,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl JobEvent {
    pub fn from_job(job: &Job, at: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id,
            state: job.state,
            attempt: job.attempts,
            error: job.error.clone(),
            at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> JobPayload {
        JobPayload::new(
            ResourceRef::new("transcript", "abc").unwrap(),
            serde_json::json!({ "url": "https://youtu.be/abc" }),
        )
    }

    #[test]
    fn test_new_job_is_waiting() {
        let job = Job::new("transcripts", payload(), Utc::now());
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts, 0);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_transitions_are_forward_only() {
        use JobState::*;
        assert!(Waiting.can_transition_to(Active));
        assert!(Active.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Failed));

        assert!(!Waiting.can_transition_to(Completed));
        assert!(!Active.can_transition_to(Waiting));
        for terminal in [Completed, Failed] {
            for next in [Waiting, Active, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            JobState::Waiting,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("running".parse::<JobState>().is_err());
    }

    #[test]
    fn test_job_serializes_without_empty_outcome_fields() {
        let job = Job::new("transcripts", payload(), Utc::now());
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["state"], "waiting");
        assert!(json.get("result").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_payload_param_lookup() {
        let p = payload();
        assert_eq!(p.param_str("url"), Some("https://youtu.be/abc"));
        assert_eq!(p.param_str("lang"), None);
        assert_eq!(p.cache_key().as_str(), "transcript:abc");
    }

    #[test]
    fn test_transcript_key_includes_language() {
        let en = JobPayload::transcript("dQw4w9WgXcQ", "en", "https://youtu.be/dQw4w9WgXcQ").unwrap();
        let de = JobPayload::transcript("dQw4w9WgXcQ", " DE ", "dQw4w9WgXcQ").unwrap();
        assert_eq!(en.cache_key().as_str(), "transcript:dQw4w9WgXcQ.en");
        assert_eq!(de.cache_key().as_str(), "transcript:dQw4w9WgXcQ.de");
        assert_ne!(en.cache_key(), de.cache_key());
        assert_eq!(de.param_str("lang"), Some("de"));
        assert_eq!(de.video_id(), "dQw4w9WgXcQ");

        assert!(JobPayload::transcript("dQw4w9WgXcQ", "pt BR", "x").is_err());
    }

    #[test]
    fn test_video_id_falls_back_to_resource_id() {
        assert_eq!(payload().video_id(), "abc");
        let bare = JobPayload::new(
            ResourceRef::new("transcript", "abc.fr").unwrap(),
            serde_json::json!({}),
        );
        assert_eq!(bare.video_id(), "abc");
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<JobId>().unwrap(), a);
    }
}
