//! Per-platform content validation
//!
//! Table-driven checks against each platform's declared limits. Hard-limit
//! violations populate `issues` and block dispatch before the rate limiter
//! or circuit breaker are touched; soft rules only ever produce warnings.
//!
//! Lengths are counted in characters, not bytes, matching how the platforms
//! themselves meter posts.

use crate::config::{HashtagStyle, PlatformConfig};
use crate::types::{Content, MediaKind};

/// Result of validating one content item against one platform.
#[derive(Debug, Clone)]
pub struct Validation {
    pub is_valid: bool,
    /// Hard rule violations; non-empty implies `is_valid == false`
    pub issues: Vec<String>,
    /// Advisory findings; never block dispatch
    pub warnings: Vec<String>,
}

pub struct ContentValidator;

impl ContentValidator {
    /// Validate `content` against `platform`'s limits.
    pub fn validate(content: &Content, platform: &PlatformConfig) -> Validation {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        let body_chars = content.body.chars().count();

        if content.body.trim().is_empty() {
            issues.push("content body is empty".to_string());
        }

        if body_chars > platform.max_length {
            issues.push(format!(
                "content exceeds {}'s {} character limit (current: {} characters)",
                platform.name, platform.max_length, body_chars
            ));
        } else if platform.max_length > 0
            && body_chars * 10 >= platform.max_length * 9
            && body_chars > 0
        {
            warnings.push(format!(
                "content is within 10% of {}'s {} character limit",
                platform.name, platform.max_length
            ));
        }

        if content.hashtags.len() > platform.max_hashtags {
            issues.push(format!(
                "too many hashtags for {} ({} allowed, got {})",
                platform.name,
                platform.max_hashtags,
                content.hashtags.len()
            ));
        }

        if content.media.len() > platform.max_media {
            issues.push(format!(
                "too many media items for {} ({} allowed, got {})",
                platform.name,
                platform.max_media,
                content.media.len()
            ));
        }

        if !platform.allows_video
            && content.media.iter().any(|m| m.kind == MediaKind::Video)
        {
            issues.push(format!("{} does not accept video media", platform.name));
        }

        // Hashtag reservation: with trailing placement the tags eat into the
        // body budget, so warn when the formatter will have to truncate.
        if platform.hashtag_style == HashtagStyle::Trailing
            && body_chars <= platform.max_length
            && !content.hashtags.is_empty()
        {
            let reserve = hashtag_reserve(&content.hashtags);
            if body_chars + reserve > platform.max_length {
                warnings.push(format!(
                    "body will be truncated to reserve space for {} trailing hashtags",
                    content.hashtags.len()
                ));
            }
        }

        let tag_chars: usize = content.hashtags.iter().map(|t| t.chars().count()).sum();
        if body_chars > 0 && tag_chars > body_chars / 2 {
            warnings.push("hashtags dominate the content body".to_string());
        }

        if platform.visual_first && content.media.is_empty() {
            warnings.push(format!(
                "{} posts perform better with visual media attached",
                platform.name
            ));
        }

        Validation {
            is_valid: issues.is_empty(),
            issues,
            warnings,
        }
    }
}

/// Characters a trailing hashtag block consumes: " #tag" per tag.
pub(crate) fn hashtag_reserve(hashtags: &[String]) -> usize {
    hashtags.iter().map(|t| t.chars().count() + 2).sum()
}
