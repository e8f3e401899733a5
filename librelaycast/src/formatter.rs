//! Per-platform payload formatting
//!
//! Turns a validated content item into the shape one platform expects:
//! hashtags placed inline or trailing per platform convention, body truncated
//! on a character boundary to fit the limit (reserving room for trailing
//! tags), media capped at the platform's maximum.

use crate::config::{HashtagStyle, PlatformConfig};
use crate::types::{Content, PlatformPayload};
use crate::validator::hashtag_reserve;

const ELLIPSIS: char = '…';

pub struct ContentFormatter;

impl ContentFormatter {
    /// Build the platform payload for `content`.
    pub fn format(content: &Content, platform: &PlatformConfig) -> PlatformPayload {
        let media: Vec<_> = content
            .media
            .iter()
            .take(platform.max_media)
            .cloned()
            .collect();

        match platform.hashtag_style {
            HashtagStyle::Trailing => {
                let reserve = hashtag_reserve(&content.hashtags);
                let budget = platform.max_length.saturating_sub(reserve);
                PlatformPayload {
                    platform: platform.name.clone(),
                    body: truncate_chars(&content.body, budget),
                    trailing_hashtags: content.hashtags.clone(),
                    media,
                }
            }
            HashtagStyle::Inline => {
                let mut body = content.body.clone();
                for tag in &content.hashtags {
                    body.push_str(&format!(" #{tag}"));
                }
                PlatformPayload {
                    platform: platform.name.clone(),
                    body: truncate_chars(&body, platform.max_length),
                    trailing_hashtags: Vec::new(),
                    media,
                }
            }
        }
    }
}

/// Truncate to at most `max_chars` characters, ending with an ellipsis when
/// anything was cut. Always cuts on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }

    let mut truncated: String = text.chars().take(max_chars - 1).collect();
    truncated.push(ELLIPSIS);
    truncated
}
