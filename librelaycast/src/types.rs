//! Core types for Relaycast

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A finished content item handed to the engine for delivery.
///
/// Produced by an upstream assembly/templating system; the engine only
/// consumes it. Hashtags are stored without the leading `#`. The status
/// field is caller-facing bookkeeping; the engine's own lifecycle tracking
/// lives on [`ScheduledPost`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub id: String,
    pub body: String,
    pub media: Vec<MediaRef>,
    pub hashtags: Vec<String>,
    /// Target platform names this item is intended for
    pub platforms: Vec<String>,
    pub status: ContentStatus,
    pub created_at: i64,
    pub metadata: Option<String>,
}

impl Content {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            body: body.into(),
            media: Vec::new(),
            hashtags: Vec::new(),
            platforms: Vec::new(),
            status: ContentStatus::Draft,
            created_at: chrono::Utc::now().timestamp(),
            metadata: None,
        }
    }

    pub fn with_hashtags(mut self, hashtags: Vec<String>) -> Self {
        self.hashtags = hashtags;
        self
    }

    pub fn with_media(mut self, media: Vec<MediaRef>) -> Self {
        self.media = media;
        self
    }

    pub fn with_platforms(mut self, platforms: Vec<String>) -> Self {
        self.platforms = platforms;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContentStatus {
    Draft,
    Scheduled,
    Published,
    Failed,
    Cancelled,
}

/// Reference to an already-uploaded media asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub kind: MediaKind,
    pub alt_text: Option<String>,
}

impl MediaRef {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Image,
            alt_text: None,
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: MediaKind::Video,
            alt_text: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// A delivery request deferred to a future time, tracked with retry state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub content: Content,
    pub platform: String,
    pub scheduled_at: i64,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub status: ScheduleStatus,
    /// Set by a cooperative cancel that arrived while the post was in flight.
    /// Prevents future attempts; cannot abort the in-flight dispatch.
    pub cancel_requested: bool,
}

impl ScheduledPost {
    pub fn new(content: Content, platform: impl Into<String>, scheduled_at: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content,
            platform: platform.into(),
            scheduled_at,
            attempts: 0,
            last_error: None,
            status: ScheduleStatus::Scheduled,
            cancel_requested: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Lifecycle of a scheduled post.
///
/// The spine is `Scheduled -> Publishing -> {Published | Failed | Cancelled}`.
/// `Publishing -> Scheduled` is the retry reschedule; terminal states accept
/// no further transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScheduleStatus {
    Scheduled,
    Publishing,
    Published,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Failed | Self::Cancelled)
    }

    /// Whether `from -> to` is a legal transition.
    pub fn can_transition(from: ScheduleStatus, to: ScheduleStatus) -> bool {
        use ScheduleStatus::*;
        matches!(
            (from, to),
            (Scheduled, Publishing)
                | (Scheduled, Cancelled)
                | (Publishing, Published)
                | (Publishing, Failed)
                | (Publishing, Cancelled)
                | (Publishing, Scheduled)
        )
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Publishing => write!(f, "publishing"),
            Self::Published => write!(f, "published"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome category of a `publish` call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PublishStatus {
    Published,
    Scheduled,
    Rejected,
    RateLimited,
    Failed,
}

/// Classification of a delivery failure, for retry decisions and logging.
///
/// Retry exhaustion is classified by its underlying cause so the scheduler
/// can tell "gave up on a flaky endpoint" from "the platform said no".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureKind {
    CircuitOpen,
    Timeout,
    Transient,
    Permanent,
    RateLimited,
}

impl FailureKind {
    /// Whether the scheduler should reschedule a post that failed this way.
    pub fn is_reschedulable(&self) -> bool {
        !matches!(self, Self::Permanent)
    }
}

impl From<&crate::error::DeliveryError> for FailureKind {
    fn from(error: &crate::error::DeliveryError) -> Self {
        use crate::error::DeliveryError;
        match error.root_cause() {
            DeliveryError::CircuitOpen { .. } => Self::CircuitOpen,
            DeliveryError::Timeout { .. } => Self::Timeout,
            DeliveryError::RateLimited { .. } => Self::RateLimited,
            DeliveryError::Permanent { .. } | DeliveryError::Validation { .. } => Self::Permanent,
            DeliveryError::Transient { .. } | DeliveryError::RetriesExhausted { .. } => {
                Self::Transient
            }
        }
    }
}

/// Result of a `publish` call. Always returned as a value; errors are
/// reserved for programmer mistakes (unknown platform, malformed input).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResult {
    pub status: PublishStatus,
    /// Platform-assigned post id, set on success
    pub external_id: Option<String>,
    /// Last underlying failure, set when status is Failed
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    /// Hard validation violations, set when status is Rejected
    pub issues: Vec<String>,
    /// Unix timestamp after which a retry may succeed, set when rate limited
    pub retry_after: Option<i64>,
    /// Queue id, set when status is Scheduled
    pub post_id: Option<String>,
}

impl PublishResult {
    pub fn published(external_id: String) -> Self {
        Self {
            status: PublishStatus::Published,
            external_id: Some(external_id),
            error: None,
            failure: None,
            issues: Vec::new(),
            retry_after: None,
            post_id: None,
        }
    }

    pub fn scheduled(post_id: String) -> Self {
        Self {
            status: PublishStatus::Scheduled,
            external_id: None,
            error: None,
            failure: None,
            issues: Vec::new(),
            retry_after: None,
            post_id: Some(post_id),
        }
    }

    pub fn rejected(issues: Vec<String>) -> Self {
        Self {
            status: PublishStatus::Rejected,
            external_id: None,
            error: None,
            failure: None,
            issues,
            retry_after: None,
            post_id: None,
        }
    }

    pub fn rate_limited(retry_after: i64) -> Self {
        Self {
            status: PublishStatus::RateLimited,
            external_id: None,
            error: None,
            failure: None,
            issues: Vec::new(),
            retry_after: Some(retry_after),
            post_id: None,
        }
    }

    pub fn failed(error: &crate::error::DeliveryError) -> Self {
        Self {
            status: PublishStatus::Failed,
            external_id: None,
            error: Some(error.to_string()),
            failure: Some(FailureKind::from(error)),
            issues: Vec::new(),
            retry_after: None,
            post_id: None,
        }
    }
}

/// Formatted, platform-ready payload produced by the formatter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformPayload {
    pub platform: String,
    pub body: String,
    /// Hashtags rendered after the body; empty when the platform inlines them
    pub trailing_hashtags: Vec<String>,
    pub media: Vec<MediaRef>,
}

impl PlatformPayload {
    /// Final rendered text as the platform will receive it.
    pub fn rendered_text(&self) -> String {
        if self.trailing_hashtags.is_empty() {
            self.body.clone()
        } else {
            let tags: Vec<String> = self
                .trailing_hashtags
                .iter()
                .map(|t| format!("#{t}"))
                .collect();
            format!("{} {}", self.body, tags.join(" "))
        }
    }

    /// Character count of the rendered text (chars, not bytes).
    pub fn character_count(&self) -> usize {
        self.rendered_text().chars().count()
    }
}

/// Side-effect-free formatting preview for one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewResult {
    pub platform: String,
    pub payload: PlatformPayload,
    pub character_count: usize,
    pub warnings: Vec<String>,
}

/// Per-platform delivery counters.
///
/// `attempts` counts network attempts including retries, so a publish that
/// succeeded on its fourth try adds 4 to `attempts` and 1 to `published`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub attempts: u64,
    pub published: u64,
    pub failed: u64,
    pub rejected: u64,
    pub rate_limited: u64,
    pub last_published_at: Option<i64>,
}
