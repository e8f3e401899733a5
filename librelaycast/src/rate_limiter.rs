//! Token-bucket rate limiting for outbound platform calls
//!
//! One bucket per platform, refilled lazily from elapsed time; no background
//! ticking. `acquire` never blocks: it either grants a token or reports when
//! to come back. Platform-reported rate headers can tighten the local
//! estimate via [`RateLimiter::apply_platform_hint`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::PlatformConfig;

/// Outcome of a token request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    Granted,
    /// No token available; retry after the given delay. The caller decides
    /// whether to surface the delay or requeue.
    Denied { retry_after: Duration },
}

impl RateDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Granted => None,
            Self::Denied { retry_after } => Some(*retry_after),
        }
    }
}

/// Platform-reported rate state, parsed from response headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitHint {
    pub remaining: u32,
    pub reset_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct BucketParams {
    capacity: u32,
    refill_per_sec: f64,
}

#[derive(Debug)]
struct TokenBucket {
    params: BucketParams,
    tokens: f64,
    last_refill: Instant,
    /// Reset instant reported by the platform; used for retry_after when it
    /// is later than the local estimate
    reset_hint: Option<Instant>,
}

impl TokenBucket {
    fn new(params: BucketParams, now: Instant) -> Self {
        Self {
            params,
            tokens: f64::from(params.capacity),
            last_refill: now,
            reset_hint: None,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.params.refill_per_sec)
            .min(f64::from(self.params.capacity));
        self.last_refill = now;
        if let Some(hint) = self.reset_hint {
            if now >= hint {
                self.reset_hint = None;
            }
        }
    }

    fn try_take(&mut self, now: Instant) -> RateDecision {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return RateDecision::Granted;
        }

        // Time until one whole token accrues
        let deficit = 1.0 - self.tokens;
        let local_wait = Duration::from_secs_f64(deficit / self.params.refill_per_sec);
        let retry_after = match self.reset_hint {
            Some(hint) => local_wait.max(hint.saturating_duration_since(now)),
            None => local_wait,
        };

        RateDecision::Denied { retry_after }
    }
}

/// Per-platform token-bucket gate.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    params: HashMap<String, BucketParams>,
}

impl RateLimiter {
    /// Build a limiter from the configured platforms. Platforms not in the
    /// table are not limited.
    pub fn new(platforms: &[PlatformConfig]) -> Self {
        let params = platforms
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    BucketParams {
                        capacity: p.rate_capacity,
                        refill_per_sec: p.rate_refill_per_sec,
                    },
                )
            })
            .collect();

        Self {
            buckets: Mutex::new(HashMap::new()),
            params,
        }
    }

    /// Request a token for `platform`. Never blocks.
    pub fn acquire(&self, platform: &str) -> RateDecision {
        self.acquire_at(platform, Instant::now())
    }

    /// Request a token at an explicit instant. Used by tests and anything
    /// replaying recorded time.
    pub fn acquire_at(&self, platform: &str, now: Instant) -> RateDecision {
        let Some(&params) = self.params.get(platform) else {
            // No limit configured, allow
            return RateDecision::Granted;
        };

        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry(platform.to_string())
            .or_insert_with(|| TokenBucket::new(params, now));

        let decision = bucket.try_take(now);
        if let RateDecision::Denied { retry_after } = decision {
            debug!(
                platform,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit token unavailable"
            );
        }
        decision
    }

    /// Tighten the local estimate from platform-reported headers.
    ///
    /// Only ever lowers the available tokens; a platform reporting more
    /// headroom than the local bucket is ignored.
    pub fn apply_platform_hint(&self, platform: &str, hint: RateLimitHint) {
        self.apply_platform_hint_at(platform, hint, Instant::now());
    }

    pub fn apply_platform_hint_at(&self, platform: &str, hint: RateLimitHint, now: Instant) {
        let Some(&params) = self.params.get(platform) else {
            return;
        };

        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry(platform.to_string())
            .or_insert_with(|| TokenBucket::new(params, now));

        bucket.refill(now);
        let reported = f64::from(hint.remaining);
        if reported < bucket.tokens {
            debug!(
                platform,
                local = bucket.tokens,
                reported,
                "tightening rate estimate from platform headers"
            );
            bucket.tokens = reported;
        }
        bucket.reset_hint = Some(now + hint.reset_after);
    }

    /// Remaining whole tokens for a platform, refilled to `now`. None when
    /// the platform has no configured limit.
    pub fn remaining(&self, platform: &str) -> Option<u32> {
        let &params = self.params.get(platform)?;
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry(platform.to_string())
            .or_insert_with(|| TokenBucket::new(params, now));
        bucket.refill(now);
        Some(bucket.tokens as u32)
    }
}
