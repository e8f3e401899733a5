//! Configuration management for Relaycast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub platforms: Vec<PlatformConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub circuit: CircuitConfig,
}

/// Per-platform limits, rate parameters, and endpoint descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub name: String,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_max_hashtags")]
    pub max_hashtags: usize,
    #[serde(default = "default_max_media")]
    pub max_media: usize,
    #[serde(default = "default_true")]
    pub allows_video: bool,
    /// Platforms where posts without media underperform; produces a warning,
    /// never an issue
    #[serde(default)]
    pub visual_first: bool,
    #[serde(default)]
    pub hashtag_style: HashtagStyle,
    #[serde(default = "default_rate_capacity")]
    pub rate_capacity: u32,
    #[serde(default = "default_rate_refill")]
    pub rate_refill_per_sec: f64,
    /// POST target for the HTTP adapter; None for adapter-supplied transports
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Optional credential-check URL for the HTTP adapter
    #[serde(default)]
    pub verify_endpoint: Option<String>,
}

impl PlatformConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_length: default_max_length(),
            max_hashtags: default_max_hashtags(),
            max_media: default_max_media(),
            allows_video: true,
            visual_first: false,
            hashtag_style: HashtagStyle::default(),
            rate_capacity: default_rate_capacity(),
            rate_refill_per_sec: default_rate_refill(),
            endpoint: None,
            verify_endpoint: None,
        }
    }
}

/// Where a platform conventionally places hashtags.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashtagStyle {
    /// Hashtags flow with the body text
    #[default]
    Inline,
    /// Hashtags rendered after the body, with body space reserved for them
    Trailing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between queue scans
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Scheduler-level delivery attempts before a post is marked failed
    #[serde(default = "default_sched_attempts")]
    pub max_attempts: u32,
    /// Concurrent dispatches per tick
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Base delay for reschedule backoff
    #[serde(default = "default_sched_base_delay")]
    pub retry_base_delay_secs: u64,
    /// Cap on reschedule backoff
    #[serde(default = "default_sched_max_delay")]
    pub retry_max_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_attempts: default_sched_attempts(),
            max_in_flight: default_max_in_flight(),
            retry_base_delay_secs: default_sched_base_delay(),
            retry_max_delay_secs: default_sched_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_ms(),
            max_delay_ms: default_retry_max_ms(),
            jitter_fraction: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Per-attempt timeout on the outbound platform call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// When a token is unavailable, requeue as a scheduled post instead of
    /// returning a rate-limited result
    #[serde(default)]
    pub auto_requeue_on_rate_limit: bool,
    /// TTL on cached delivery-state entries
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
            auto_requeue_on_rate_limit: false,
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
    #[serde(default = "default_half_open_trials")]
    pub half_open_trial_limit: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            half_open_trial_limit: default_half_open_trials(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: EngineConfig = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration with two illustrative platforms
    pub fn default_config() -> Self {
        let mut mastodon = PlatformConfig::new("mastodon");
        mastodon.max_length = 500;
        mastodon.max_hashtags = 10;
        mastodon.max_media = 4;
        mastodon.hashtag_style = HashtagStyle::Trailing;
        mastodon.rate_capacity = 300;
        mastodon.rate_refill_per_sec = 300.0 / 3600.0;

        let mut bluesky = PlatformConfig::new("bluesky");
        bluesky.max_length = 300;
        bluesky.max_hashtags = 8;
        bluesky.max_media = 4;
        bluesky.allows_video = false;
        bluesky.hashtag_style = HashtagStyle::Inline;
        bluesky.rate_capacity = 100;
        bluesky.rate_refill_per_sec = 100.0 / 3600.0;

        Self {
            platforms: vec![mastodon, bluesky],
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            delivery: DeliveryConfig::default(),
            circuit: CircuitConfig::default(),
        }
    }

    pub fn platform(&self, name: &str) -> Option<&PlatformConfig> {
        self.platforms.iter().find(|p| p.name == name)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery.call_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        for platform in &self.platforms {
            if platform.name.trim().is_empty() {
                return Err(ConfigError::MissingField("platform.name".to_string()).into());
            }
            if platform.rate_refill_per_sec <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "platform '{}': rate_refill_per_sec must be positive",
                    platform.name
                ))
                .into());
            }
            if platform.rate_capacity == 0 {
                return Err(ConfigError::Invalid(format!(
                    "platform '{}': rate_capacity must be at least 1",
                    platform.name
                ))
                .into());
            }
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_fraction) {
            return Err(
                ConfigError::Invalid("retry.jitter_fraction must be in [0, 1]".to_string()).into(),
            );
        }
        if self.scheduler.max_in_flight == 0 {
            return Err(
                ConfigError::Invalid("scheduler.max_in_flight must be at least 1".to_string())
                    .into(),
            );
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("RELAYCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("relaycast").join("config.toml"))
}

fn default_max_length() -> usize {
    5000
}
fn default_max_hashtags() -> usize {
    30
}
fn default_max_media() -> usize {
    4
}
fn default_true() -> bool {
    true
}
fn default_rate_capacity() -> u32 {
    60
}
fn default_rate_refill() -> f64 {
    1.0
}
fn default_poll_interval() -> u64 {
    10
}
fn default_sched_attempts() -> u32 {
    5
}
fn default_max_in_flight() -> usize {
    10
}
fn default_sched_base_delay() -> u64 {
    60
}
fn default_sched_max_delay() -> u64 {
    3600
}
fn default_retry_attempts() -> u32 {
    5
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_retry_max_ms() -> u64 {
    60_000
}
fn default_jitter() -> f64 {
    0.25
}
fn default_call_timeout() -> u64 {
    30
}
fn default_cache_ttl() -> u64 {
    3600
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout() -> u64 {
    30
}
fn default_half_open_trials() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_has_platforms() {
        let config = EngineConfig::default_config();
        assert!(config.platform("mastodon").is_some());
        assert!(config.platform("bluesky").is_some());
        assert!(config.platform("myspace").is_none());

        let mastodon = config.platform("mastodon").unwrap();
        assert_eq!(mastodon.max_length, 500);
        assert_eq!(mastodon.hashtag_style, HashtagStyle::Trailing);
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[scheduler]
poll_interval_secs = 5
max_attempts = 3

[retry]
max_attempts = 4
base_delay_ms = 500

[delivery]
auto_requeue_on_rate_limit = true

[[platforms]]
name = "mastodon"
max_length = 500
hashtag_style = "trailing"
rate_capacity = 300
rate_refill_per_sec = 0.0833
endpoint = "https://mastodon.example/api/v1/statuses"
"#
        )
        .unwrap();

        let config = EngineConfig::load_from_path(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.scheduler.poll_interval_secs, 5);
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.retry.max_attempts, 4);
        assert!(config.delivery.auto_requeue_on_rate_limit);

        let mastodon = config.platform("mastodon").unwrap();
        assert_eq!(mastodon.max_length, 500);
        assert_eq!(
            mastodon.endpoint.as_deref(),
            Some("https://mastodon.example/api/v1/statuses")
        );
        // Unspecified fields take defaults
        assert_eq!(mastodon.max_media, 4);
    }

    #[test]
    fn load_rejects_zero_refill_rate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[platforms]]
name = "mastodon"
rate_refill_per_sec = 0.0
"#
        )
        .unwrap();

        let result = EngineConfig::load_from_path(&file.path().to_path_buf());
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("rate_refill_per_sec"));
    }

    #[test]
    fn load_rejects_bad_jitter() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[retry]
jitter_fraction = 1.5
"#
        )
        .unwrap();

        let result = EngineConfig::load_from_path(&file.path().to_path_buf());
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_is_read_error() {
        let result =
            EngineConfig::load_from_path(&PathBuf::from("/nonexistent/relaycast/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn scheduler_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.max_in_flight, 10);
        assert_eq!(config.max_attempts, 5);
    }
}
