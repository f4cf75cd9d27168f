//! Upstream HTTP clients.
//!
//! Both clients share one [`HttpUpstream`]: a pooled `reqwest::Client`, the
//! provider base URL and an outbound `governor` throttle. The throttle keeps
//! the aggregate request rate of every worker in this process under the
//! provider's own limit; the shared [`RateLimiter`](vidscribe_storage::RateLimiter)
//! governs callers, this governs us.

pub mod metadata;
pub mod transcript;

pub use metadata::MetadataClient;
pub use transcript::TranscriptClient;

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use reqwest::StatusCode;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vidscribe_core::FetchError;

use crate::config::UpstreamConfig;

/// Type alias for the outbound throttle.
type OutboundThrottle = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shared plumbing for upstream clients.
#[derive(Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    /// Per-request timeout the client enforces.
    timeout: Duration,
    throttle: Arc<OutboundThrottle>,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("vidscribe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Unavailable {
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
            throttle: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` (relative to the base URL) and decode a JSON body.
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<serde_json::Value, FetchError> {
        self.throttle.until_ready().await;

        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self.client.get(&url).query(query);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, path, body, started.elapsed()));
        }

        response.json().await.map_err(|e| FetchError::Unavailable {
            reason: format!("malformed upstream body: {}", e),
        })
    }
}

impl std::fmt::Debug for HttpUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUpstream")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout { after: timeout }
    } else {
        FetchError::Unavailable {
            reason: err.to_string(),
        }
    }
}

/// Classify a non-success upstream status. `elapsed` is how long the request
/// took, reported when the provider itself timed out.
pub(crate) fn status_error(
    status: StatusCode,
    resource: &str,
    body: String,
    elapsed: Duration,
) -> FetchError {
    let message: String = body.chars().take(200).collect();
    match status {
        StatusCode::NOT_FOUND => FetchError::NotFound {
            resource: resource.to_string(),
        },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            FetchError::InvalidInput { reason: message }
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            FetchError::Timeout { after: elapsed }
        }
        StatusCode::TOO_MANY_REQUESTS => FetchError::Unavailable {
            reason: "upstream throttled the request".to_string(),
        },
        s if s.is_server_error() => FetchError::Unavailable {
            reason: format!("upstream returned {}", s.as_u16()),
        },
        s => FetchError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let e = status_error(StatusCode::NOT_FOUND, "videos/x", String::new(), Duration::ZERO);
        assert!(matches!(e, FetchError::NotFound { .. }));
        assert!(!e.is_transient());

        let e = status_error(StatusCode::TOO_MANY_REQUESTS, "videos/x", String::new(), Duration::ZERO);
        assert!(e.is_transient());

        let e = status_error(StatusCode::BAD_GATEWAY, "videos/x", String::new(), Duration::ZERO);
        assert!(e.is_transient());

        let e = status_error(StatusCode::FORBIDDEN, "videos/x", "nope".to_string(), Duration::ZERO);
        assert!(matches!(e, FetchError::Rejected { status: 403, .. }));
        assert!(!e.is_transient());

        let e = status_error(StatusCode::UNPROCESSABLE_ENTITY, "videos/x", "bad lang".to_string(), Duration::ZERO);
        assert!(matches!(e, FetchError::InvalidInput { ref reason } if reason == "bad lang"));

        let e = status_error(
            StatusCode::GATEWAY_TIMEOUT,
            "videos/x",
            String::new(),
            Duration::from_secs(12),
        );
        assert_eq!(e, FetchError::Timeout { after: Duration::from_secs(12) });
    }

    #[tokio::test]
    async fn test_client_timeout_reports_configured_duration() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut config = UpstreamConfig::new(format!("http://{}", addr));
        config.timeout = Duration::from_millis(150);
        let upstream = HttpUpstream::new(&config).unwrap();

        let err = upstream.get_json("transcripts/dQw4w9WgXcQ", &[]).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Timeout {
                after: Duration::from_millis(150)
            }
        );
        assert!(err.to_string().contains("150ms"), "{}", err);
        silent.abort();
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let mut config = UpstreamConfig::new("https://up.example");
        config.api_key = Some("secret".to_string());
        let upstream = HttpUpstream::new(&config).unwrap();
        let debug = format!("{:?}", upstream);
        assert!(!debug.contains("secret"));
        assert_eq!(upstream.base_url(), "https://up.example");
    }
}
