//! Transcript extraction client.

use async_trait::async_trait;
use vidscribe_core::{FetchError, JobPayload, ResourceClass, UpstreamFetcher, TRANSCRIPT_RESOURCE};

use super::HttpUpstream;

/// Fetches the transcript of one video: `GET {base}/transcripts/{video_id}`.
#[derive(Debug, Clone)]
pub struct TranscriptClient {
    http: HttpUpstream,
}

impl TranscriptClient {
    pub fn new(http: HttpUpstream) -> Self {
        Self { http }
    }
}

#[async_trait]
impl UpstreamFetcher for TranscriptClient {
    fn class(&self) -> ResourceClass {
        ResourceClass::TRANSCRIBE
    }

    async fn fetch(&self, payload: &JobPayload) -> Result<serde_json::Value, FetchError> {
        if payload.resource.resource_type != TRANSCRIPT_RESOURCE {
            return Err(FetchError::InvalidInput {
                reason: format!("cannot transcribe a {}", payload.resource.resource_type),
            });
        }
        let path = format!("transcripts/{}", payload.video_id());
        let lang = payload.param_str("lang").unwrap_or("en");
        self.http.get_json(&path, &[("lang", lang)]).await
    }
}
