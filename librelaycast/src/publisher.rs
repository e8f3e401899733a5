//! Publishing orchestration
//!
//! `PublisherClient` ties the pipeline together: validate, format, take a
//! rate-limit token, then dispatch through the resilience stack. Every
//! outcome lands in the per-platform delivery stats and the delivery-state
//! cache. Scheduling is a thin layer on top: a future `schedule_at` hands
//! the content to the queue instead of the network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::cache::CacheManager;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::formatter::ContentFormatter;
use crate::platforms::http::HttpPlatform;
use crate::platforms::Platform;
use crate::rate_limiter::{RateDecision, RateLimiter};
use crate::resilience::{self, CircuitBreaker, RetryPolicy};
use crate::scheduler::ScheduleStore;
use crate::types::{Content, DeliveryStats, PreviewResult, PublishResult, ScheduledPost};
use crate::validator::ContentValidator;

pub struct PublisherClient {
    config: EngineConfig,
    adapters: HashMap<String, Arc<dyn Platform>>,
    rate_limiter: RateLimiter,
    circuit: CircuitBreaker,
    retry: RetryPolicy,
    cache: CacheManager,
    stats: Mutex<HashMap<String, DeliveryStats>>,
    store: ScheduleStore,
}

impl PublisherClient {
    pub fn new(config: EngineConfig) -> Self {
        let rate_limiter = RateLimiter::new(&config.platforms);
        let circuit = CircuitBreaker::new(config.circuit.clone());
        let retry = RetryPolicy::from_config(&config.retry);

        Self {
            rate_limiter,
            circuit,
            retry,
            cache: CacheManager::new(),
            stats: Mutex::new(HashMap::new()),
            store: ScheduleStore::new(),
            adapters: HashMap::new(),
            config,
        }
    }

    /// Register a platform adapter. The adapter's name must match a
    /// configured platform.
    pub fn register_platform(&mut self, adapter: Arc<dyn Platform>) -> Result<()> {
        let name = adapter.name().to_string();
        if self.config.platform(&name).is_none() {
            return Err(EngineError::UnknownPlatform(name));
        }
        debug!(platform = name.as_str(), "platform adapter registered");
        self.adapters.insert(name, adapter);
        Ok(())
    }

    /// Build HTTP adapters for every configured platform that declares an
    /// endpoint. Platforms without one are skipped with a warning; they need
    /// an explicitly registered adapter.
    pub fn register_http_platforms(&mut self) -> Result<()> {
        let timeout = self.config.call_timeout();
        let with_endpoint: Vec<_> = self
            .config
            .platforms
            .iter()
            .filter(|p| p.endpoint.is_some())
            .cloned()
            .collect();

        for platform in &self.config.platforms {
            if platform.endpoint.is_none() {
                warn!(
                    platform = platform.name.as_str(),
                    "no endpoint configured, expecting an external adapter"
                );
            }
        }

        for config in with_endpoint {
            let adapter = HttpPlatform::from_config(&config, timeout)
                .map_err(EngineError::Delivery)?;
            self.adapters.insert(config.name.clone(), Arc::new(adapter));
        }
        Ok(())
    }

    /// Deliver `content` to `platform`, now or at `schedule_at`.
    ///
    /// Always returns a [`PublishResult`] describing the outcome; `Err` is
    /// reserved for programmer mistakes (unknown platform, malformed
    /// content reference) and surfaces at call time.
    pub async fn publish(
        &self,
        content: &Content,
        platform: &str,
        schedule_at: Option<i64>,
    ) -> Result<PublishResult> {
        self.require_known(content, platform)?;

        let now = chrono::Utc::now().timestamp();
        if let Some(at) = schedule_at {
            if at > now {
                let post_id = self.store.enqueue(content.clone(), platform, at);
                info!(
                    platform,
                    post_id = post_id.as_str(),
                    scheduled_at = at,
                    "publish deferred to schedule"
                );
                return Ok(PublishResult::scheduled(post_id));
            }
        }

        let result = self.dispatch_now(content, platform).await?;

        // A rate-limited immediate publish can be turned into a scheduled
        // one instead of bouncing the caller.
        if result.status == crate::types::PublishStatus::RateLimited
            && self.config.delivery.auto_requeue_on_rate_limit
        {
            let at = result.retry_after.unwrap_or(now + 60);
            let post_id = self.store.enqueue(content.clone(), platform, at);
            info!(
                platform,
                post_id = post_id.as_str(),
                scheduled_at = at,
                "rate limited, auto-requeued"
            );
            return Ok(PublishResult::scheduled(post_id));
        }

        Ok(result)
    }

    /// The delivery pipeline without the future-time check. The scheduler
    /// calls this for due posts.
    pub(crate) async fn dispatch_now(
        &self,
        content: &Content,
        platform: &str,
    ) -> Result<PublishResult> {
        let platform_cfg = self
            .config
            .platform(platform)
            .ok_or_else(|| EngineError::UnknownPlatform(platform.to_string()))?;
        let adapter = self
            .adapters
            .get(platform)
            .ok_or_else(|| EngineError::UnknownPlatform(platform.to_string()))?;

        // Validation failures consume no token and never touch the circuit
        let validation = ContentValidator::validate(content, platform_cfg);
        if !validation.is_valid {
            debug!(
                platform,
                content_id = content.id.as_str(),
                issues = validation.issues.len(),
                "content rejected"
            );
            self.bump_stats(platform, |s| s.rejected += 1);
            self.record_delivery(content, platform, "rejected", None);
            return Ok(PublishResult::rejected(validation.issues));
        }

        if let RateDecision::Denied { retry_after } = self.rate_limiter.acquire(platform) {
            self.bump_stats(platform, |s| s.rate_limited += 1);
            let at = chrono::Utc::now().timestamp() + retry_after.as_secs().max(1) as i64;
            self.record_delivery(content, platform, "rate_limited", None);
            return Ok(PublishResult::rate_limited(at));
        }

        let payload = ContentFormatter::format(content, platform_cfg);
        let outcome = resilience::dispatch(
            &self.circuit,
            &self.retry,
            self.config.call_timeout(),
            platform,
            || {
                let adapter = Arc::clone(adapter);
                let payload = payload.clone();
                async move { adapter.post(&payload).await }
            },
        )
        .await;

        // Platform-reported rate headers tighten the local bucket
        if let Some(hint) = adapter.rate_limit_hint() {
            self.rate_limiter.apply_platform_hint(platform, hint);
        }

        let attempts = outcome.attempts;
        self.bump_stats(platform, |s| s.attempts += u64::from(attempts));

        match outcome.result {
            Ok(external_id) => {
                let now = chrono::Utc::now().timestamp();
                info!(
                    platform,
                    content_id = content.id.as_str(),
                    external_id = external_id.as_str(),
                    attempts,
                    "published"
                );
                self.bump_stats(platform, |s| {
                    s.published += 1;
                    s.last_published_at = Some(now);
                });
                self.record_delivery(content, platform, "published", Some(&external_id));
                Ok(PublishResult::published(external_id))
            }
            Err(error) => {
                warn!(
                    platform,
                    content_id = content.id.as_str(),
                    attempts,
                    "delivery failed: {error}"
                );
                self.bump_stats(platform, |s| s.failed += 1);
                self.record_delivery(content, platform, "failed", None);
                Ok(PublishResult::failed(&error))
            }
        }
    }

    /// Formatted output and estimated metrics, with zero side effects: no
    /// rate-limit token, no circuit interaction, nothing cached.
    pub fn preview(&self, content: &Content, platform: &str) -> Result<PreviewResult> {
        let platform_cfg = self
            .config
            .platform(platform)
            .ok_or_else(|| EngineError::UnknownPlatform(platform.to_string()))?;

        let validation = ContentValidator::validate(content, platform_cfg);
        let payload = ContentFormatter::format(content, platform_cfg);
        let character_count = payload.character_count();

        let mut warnings = validation.issues;
        warnings.extend(validation.warnings);

        Ok(PreviewResult {
            platform: platform.to_string(),
            payload,
            character_count,
            warnings,
        })
    }

    /// Cancel a scheduled post. Idempotent; never errors.
    pub fn cancel(&self, post_id: &str) -> bool {
        self.store.cancel(post_id)
    }

    pub fn get_status(&self, post_id: &str) -> Option<ScheduledPost> {
        self.store.get(post_id)
    }

    /// Delivery counters for a platform; zeroes for one never used.
    pub fn get_stats(&self, platform: &str) -> DeliveryStats {
        self.stats
            .lock()
            .unwrap()
            .get(platform)
            .cloned()
            .unwrap_or_default()
    }

    /// Last recorded delivery state for a content+platform pair, if the
    /// cache entry is still live.
    pub fn last_delivery(&self, content_id: &str, platform: &str) -> Option<serde_json::Value> {
        self.cache.get(&delivery_key(content_id, platform))
    }

    /// Drop every cached delivery record for a content id, e.g. before
    /// republishing edited content.
    pub fn invalidate_content(&self, content_id: &str) -> usize {
        self.cache.invalidate(content_id)
    }

    /// Check credentials on every registered adapter, concurrently.
    pub async fn verify_platforms(&self) -> Vec<(String, bool)> {
        use futures::future::join_all;

        let checks = self.adapters.iter().map(|(name, adapter)| {
            let name = name.clone();
            let adapter = Arc::clone(adapter);
            async move {
                let ok = adapter.validate_credentials().await;
                if !ok {
                    warn!(platform = name.as_str(), "credential check failed");
                }
                (name, ok)
            }
        });

        let mut results = join_all(checks).await;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    pub(crate) fn schedule_store(&self) -> ScheduleStore {
        self.store.clone()
    }

    pub(crate) fn scheduler_config(&self) -> &crate::config::SchedulerConfig {
        &self.config.scheduler
    }

    fn require_known(&self, content: &Content, platform: &str) -> Result<()> {
        if content.id.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "content id must not be empty".to_string(),
            ));
        }
        if self.config.platform(platform).is_none() || !self.adapters.contains_key(platform) {
            return Err(EngineError::UnknownPlatform(platform.to_string()));
        }
        Ok(())
    }

    fn bump_stats(&self, platform: &str, update: impl FnOnce(&mut DeliveryStats)) {
        let mut stats = self.stats.lock().unwrap();
        update(stats.entry(platform.to_string()).or_default());
    }

    fn record_delivery(
        &self,
        content: &Content,
        platform: &str,
        state: &str,
        external_id: Option<&str>,
    ) {
        let value = json!({
            "state": state,
            "external_id": external_id,
            "at": chrono::Utc::now().timestamp(),
        });
        self.cache.set(
            delivery_key(&content.id, platform),
            value,
            Duration::from_secs(self.config.delivery.cache_ttl_secs),
            vec![content.id.clone(), platform.to_string()],
        );
    }
}

fn delivery_key(content_id: &str, platform: &str) -> String {
    format!("delivery:{content_id}:{platform}")
}
