//! Logical resource identity and the keys derived from it.
//!
//! Cache entries are keyed as `"<resource-type>:<resource-id>"` and rate
//! windows as `"<prefix>:<resource-class>:<identity>"`. Both layouts are
//! backing-store details, not a public wire format.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

use crate::error::ValidationError;

// ============================================================================
// RESOURCE IDENTITY
// ============================================================================

/// Logical identity of an upstream resource (e.g. the transcript of one video).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ResourceRef {
    /// Resource type, e.g. `transcript` or `video`.
    pub resource_type: String,
    /// Upstream identifier of the resource.
    pub resource_id: String,
}

impl ResourceRef {
    /// Build a validated resource reference.
    ///
    /// The type may not contain `:` so the derived cache key stays
    /// unambiguous; neither part may be empty or contain whitespace.
    pub fn new(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let resource_type = resource_type.into();
        let resource_id = resource_id.into();

        if resource_type.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "resource_type".to_string(),
            });
        }
        if resource_id.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "resource_id".to_string(),
            });
        }
        if resource_type.contains(':') || resource_type.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidValue {
                field: "resource_type".to_string(),
                reason: "must not contain ':' or whitespace".to_string(),
            });
        }
        if resource_id.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidValue {
                field: "resource_id".to_string(),
                reason: "must not contain whitespace".to_string(),
            });
        }

        Ok(Self {
            resource_type,
            resource_id,
        })
    }

    /// Cache key for this resource.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey(format!("{}:{}", self.resource_type, self.resource_id))
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.resource_id)
    }
}

/// Deterministic cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a resource type and id.
    pub fn new(resource_type: &str, resource_id: &str) -> Self {
        Self(format!("{}:{}", resource_type, resource_id))
    }

    /// Wrap an already formatted key.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&ResourceRef> for CacheKey {
    fn from(resource: &ResourceRef) -> Self {
        resource.cache_key()
    }
}

// ============================================================================
// RESOURCE CLASSES
// ============================================================================

/// Named resource class. Each class has its own independent limiter quota.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceClass(Cow<'static, str>);

impl ResourceClass {
    /// Transcript extraction (scarcest upstream).
    pub const TRANSCRIBE: ResourceClass = ResourceClass::from_static("transcribe");
    /// General LLM chat.
    pub const CHAT: ResourceClass = ResourceClass::from_static("chat");
    /// Text-to-speech synthesis.
    pub const TTS: ResourceClass = ResourceClass::from_static("tts");
    /// Video metadata lookups.
    pub const METADATA: ResourceClass = ResourceClass::from_static("metadata");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage key of the rate window for one identity in one class.
pub fn rate_window_key(prefix: &str, class: &ResourceClass, identity: &str) -> String {
    format!("{}:{}:{}", prefix, class, identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cache_key_layout() {
        let resource = ResourceRef::new("transcript", "abc").unwrap();
        assert_eq!(resource.cache_key().as_str(), "transcript:abc");
        assert_eq!(CacheKey::new("transcript", "abc"), resource.cache_key());
    }

    #[test]
    fn test_resource_ref_rejects_bad_parts() {
        assert!(matches!(
            ResourceRef::new("", "abc"),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
        assert!(matches!(
            ResourceRef::new("transcript", ""),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
        assert!(matches!(
            ResourceRef::new("video:meta", "abc"),
            Err(ValidationError::InvalidValue { .. })
        ));
        assert!(matches!(
            ResourceRef::new("transcript", "a b"),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_rate_window_key_layout() {
        let key = rate_window_key("ratelimit", &ResourceClass::TRANSCRIBE, "10.0.0.1");
        assert_eq!(key, "ratelimit:transcribe:10.0.0.1");
    }

    #[test]
    fn test_resource_class_equality_static_vs_owned() {
        assert_eq!(ResourceClass::TTS, ResourceClass::new("tts"));
        assert_ne!(ResourceClass::TTS, ResourceClass::CHAT);
    }

    proptest! {
        #[test]
        fn prop_distinct_resources_have_distinct_keys(
            t1 in "[a-z]{1,8}", id1 in "[A-Za-z0-9_-]{1,11}",
            t2 in "[a-z]{1,8}", id2 in "[A-Za-z0-9_-]{1,11}",
        ) {
            let a = ResourceRef::new(t1.clone(), id1.clone()).unwrap();
            let b = ResourceRef::new(t2.clone(), id2.clone()).unwrap();
            prop_assert_eq!(a == b, a.cache_key() == b.cache_key());
        }
    }
}
