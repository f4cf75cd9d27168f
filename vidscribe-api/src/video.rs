//! Video id extraction from user-supplied URLs.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ApiError;

/// Length of a YouTube video id.
pub const VIDEO_ID_LEN: usize = 11;

static URL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:youtube\.com|youtube-nocookie\.com)/watch\?(?:.*&)?v=([A-Za-z0-9_-]{11})",
        r"youtu\.be/([A-Za-z0-9_-]{11})",
        r"youtube\.com/shorts/([A-Za-z0-9_-]{11})",
        r"(?:youtube\.com|youtube-nocookie\.com)/embed/([A-Za-z0-9_-]{11})",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

fn is_video_id(s: &str) -> bool {
    s.len() == VIDEO_ID_LEN
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extract the video id from a watch, short, shorts or embed URL, or accept
/// a bare id.
pub fn parse_video_id(input: &str) -> Option<String> {
    let input = input.trim();
    if is_video_id(input) {
        return Some(input.to_string());
    }
    URL_PATTERNS.iter().find_map(|re| {
        re.captures(input)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

/// [`parse_video_id`] for request handlers.
pub fn require_video_id(input: &str) -> Result<String, ApiError> {
    parse_video_id(input).ok_or_else(|| {
        ApiError::invalid_input("Could not extract a video id from the given URL")
            .with_details(serde_json::json!({ "url": input }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "dQw4w9WgXcQ";

    #[test]
    fn test_accepts_known_url_shapes() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=42",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "  dQw4w9WgXcQ  ",
        ] {
            assert_eq!(parse_video_id(url).as_deref(), Some(ID), "{url}");
        }
    }

    #[test]
    fn test_rejects_other_input() {
        for url in [
            "",
            "https://vimeo.com/123456",
            "https://www.youtube.com/watch?v=short",
            "https://www.youtube.com/channel/UC123",
            "dQw4w9WgXc",
        ] {
            assert_eq!(parse_video_id(url), None, "{url}");
        }
    }

    #[test]
    fn test_require_maps_to_invalid_input() {
        let err = require_video_id("nope").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidInput);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;
        use vidscribe_test_utils::generators::arb_video_id;

        proptest! {
            #[test]
            fn prop_every_url_shape_yields_the_same_id(id in arb_video_id()) {
                let urls = [
                    format!("https://www.youtube.com/watch?v={}", id),
                    format!("https://youtu.be/{}", id),
                    format!("https://www.youtube.com/shorts/{}", id),
                    format!("https://www.youtube.com/embed/{}", id),
                    id.clone(),
                ];
                for url in urls {
                    let parsed = parse_video_id(&url);
                    prop_assert_eq!(parsed.as_deref(), Some(id.as_str()), "url: {}", url);
                }
            }
        }
    }
}
