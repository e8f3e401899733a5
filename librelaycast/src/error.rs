//! Error types for Relaycast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl EngineError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::InvalidInput(_) | EngineError::UnknownPlatform(_) => 3,
            EngineError::Config(_) => 2,
            EngineError::Delivery(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Errors produced while delivering a payload to a platform.
///
/// The variants split into retryable failures (timeouts, connection trouble,
/// 5xx-equivalent responses, rate limits) and terminal ones (validation,
/// 4xx-equivalent rejections, an open circuit). `is_retryable` is the single
/// source of truth for that split; the retry loop consults nothing else.
#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    #[error("content failed validation: {}", .issues.join("; "))]
    Validation {
        /// Hard rule violations, one per failed check
        issues: Vec<String>,
    },

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("circuit breaker open for platform {platform}")]
    CircuitOpen { platform: String },

    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("transient delivery failure: {message}")]
    Transient { message: String },

    #[error("permanent delivery failure{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Permanent {
        status: Option<u16>,
        message: String,
    },

    #[error("delivery failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<DeliveryError>,
    },
}

impl DeliveryError {
    pub fn validation(issues: Vec<String>) -> Self {
        Self::Validation { issues }
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    pub fn circuit_open(platform: impl Into<String>) -> Self {
        Self::CircuitOpen {
            platform: platform.into(),
        }
    }

    pub fn timeout(elapsed_ms: u64) -> Self {
        Self::Timeout { elapsed_ms }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Permanent {
            status,
            message: message.into(),
        }
    }

    pub fn retries_exhausted(attempts: u32, last: DeliveryError) -> Self {
        Self::RetriesExhausted {
            attempts,
            source: Box::new(last),
        }
    }

    /// Whether the retry loop may attempt this call again.
    ///
    /// Timeouts, transient failures, and rate limits are retryable. Validation
    /// failures, permanent platform rejections, open circuits, and exhausted
    /// retries are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transient { .. } | Self::RateLimited { .. } => true,
            Self::Validation { .. }
            | Self::Permanent { .. }
            | Self::CircuitOpen { .. }
            | Self::RetriesExhausted { .. } => false,
        }
    }

    /// Platform-provided retry delay, if the failure carried one.
    ///
    /// Overrides the computed exponential backoff when present.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// The underlying failure, unwrapping retry exhaustion.
    pub fn root_cause(&self) -> &DeliveryError {
        match self {
            Self::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
