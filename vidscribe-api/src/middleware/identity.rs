//! Caller identity for admission control.
//!
//! Rate windows are keyed by the client address. Behind a reverse proxy the
//! socket peer is the proxy, so the forwarding headers win when present.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Identity used when nothing better is known.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Stable string identifying the caller of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

impl ClientIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First parsable address of `X-Forwarded-For`, then `X-Real-IP`.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(forwarded_for) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        // X-Forwarded-For can contain multiple IPs, take the first one
        if let Some(first_ip) = forwarded_for.split(',').next() {
            if let Ok(ip) = first_ip.trim().parse() {
                return Some(ip);
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|real_ip| real_ip.trim().parse().ok())
}

/// Resolve the caller identity from headers and the optional peer address.
pub fn resolve_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientIdentity {
    let ip = forwarded_ip(headers).or_else(|| peer.map(|addr| addr.ip()));
    ClientIdentity(
        ip.map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string()),
    )
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(resolve_identity(&parts.headers, peer))
    }
}
