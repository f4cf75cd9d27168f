//! Video metadata client.

use async_trait::async_trait;
use vidscribe_core::{FetchError, JobPayload, ResourceClass, UpstreamFetcher};

use super::HttpUpstream;

/// Fetches video metadata: `GET {base}/videos/{video_id}`.
///
/// The body is passed through untouched apart from a few well-known fields
/// that are lifted into a stable shape for the UI.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    http: HttpUpstream,
}

impl MetadataClient {
    pub fn new(http: HttpUpstream) -> Self {
        Self { http }
    }
}

/// Map the provider's snippet fields, keeping the raw document under `raw`.
fn normalize(video_id: &str, raw: serde_json::Value) -> serde_json::Value {
    let field = |name: &str| {
        raw.get(name)
            .or_else(|| raw.get("snippet").and_then(|s| s.get(name)))
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    };
    serde_json::json!({
        "video_id": video_id,
        "title": field("title"),
        "channel": field("channelTitle"),
        "published_at": field("publishedAt"),
        "duration": field("duration"),
        "raw": raw,
    })
}

#[async_trait]
impl UpstreamFetcher for MetadataClient {
    fn class(&self) -> ResourceClass {
        ResourceClass::METADATA
    }

    async fn fetch(&self, payload: &JobPayload) -> Result<serde_json::Value, FetchError> {
        let video_id = &payload.resource.resource_id;
        let raw = self.http.get_json(&format!("videos/{}", video_id), &[]).await?;
        Ok(normalize(video_id, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_reads_top_level_and_snippet() {
        let raw = json!({
            "snippet": { "title": "Never Gonna", "channelTitle": "Rick" },
            "duration": "PT3M33S",
        });
        let out = normalize("dQw4w9WgXcQ", raw.clone());
        assert_eq!(out["title"], "Never Gonna");
        assert_eq!(out["channel"], "Rick");
        assert_eq!(out["duration"], "PT3M33S");
        assert_eq!(out["published_at"], serde_json::Value::Null);
        assert_eq!(out["raw"], raw);
    }
}
