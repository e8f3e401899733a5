//! Exponential backoff with jitter
//!
//! Delay for attempt n (1-based) is `min(max_delay, base_delay * 2^(n-1))`
//! plus uniform random jitter in `[0, delay * jitter_fraction]`. A
//! rate-limit error carrying its own retry-after hint overrides the
//! computed delay.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::DeliveryError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay added as random jitter, in [0, 1]
    pub jitter_fraction: f64,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        jitter_fraction: f64,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter_fraction: jitter_fraction.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter_fraction,
        )
    }

    /// No-jitter policy for deterministic tests.
    pub fn fixed(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self::new(max_attempts, base_delay, max_delay, 0.0)
    }

    /// Exponential delay before re-attempting after a failure on `attempt`
    /// (1-based), capped, without jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    /// Exponential delay with jitter applied.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        if self.jitter_fraction <= 0.0 {
            return base;
        }

        let jitter_max = base.as_secs_f64() * self.jitter_fraction;
        let jitter = rand::thread_rng().gen_range(0.0..=jitter_max);
        base + Duration::from_secs_f64(jitter)
    }

    /// Backoff with jitter applied, honoring a platform retry-after hint
    /// from the failure when one is present.
    pub fn backoff_delay(&self, attempt: u32, error: &DeliveryError) -> Duration {
        if let Some(secs) = error.retry_after_secs() {
            return Duration::from_secs(secs);
        }
        self.jittered_backoff(attempt)
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let policy = RetryPolicy::fixed(
            10,
            Duration::from_secs(1),
            Duration::from_secs(512),
        );

        assert_eq!(policy.base_backoff(1), Duration::from_secs(1));
        assert_eq!(policy.base_backoff(2), Duration::from_secs(2));
        assert_eq!(policy.base_backoff(3), Duration::from_secs(4));
        assert_eq!(policy.base_backoff(4), Duration::from_secs(8));
        assert_eq!(policy.base_backoff(5), Duration::from_secs(16));
    }

    #[test]
    fn backoff_capped_at_max_delay() {
        let policy = RetryPolicy::fixed(
            20,
            Duration::from_secs(1),
            Duration::from_secs(60),
        );

        assert_eq!(policy.base_backoff(10), Duration::from_secs(60));
        // Deep attempt numbers must not overflow
        assert_eq!(policy.base_backoff(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_secs(10),
            Duration::from_secs(600),
            0.5,
        );
        let error = DeliveryError::transient("flaky");

        let mut seen = std::collections::HashSet::new();
        for _ in 0..30 {
            let delay = policy.backoff_delay(1, &error);
            // base 10s, jitter in [0, 5s]
            assert!(delay >= Duration::from_secs(10), "jitter is additive only");
            assert!(delay <= Duration::from_secs(15));
            seen.insert(delay.as_millis());
        }
        assert!(seen.len() > 1, "jitter should vary");
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(100), Duration::from_secs(10));
        let error = DeliveryError::timeout(50);

        assert_eq!(policy.backoff_delay(2, &error), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2, &error), Duration::from_millis(200));
    }

    #[test]
    fn rate_limit_hint_overrides_backoff() {
        let policy = RetryPolicy::fixed(5, Duration::from_secs(1), Duration::from_secs(60));
        let error = DeliveryError::rate_limited(120);

        assert_eq!(policy.backoff_delay(1, &error), Duration::from_secs(120));
    }

    #[test]
    fn attempt_budget() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1), Duration::from_secs(10));

        assert!(policy.allows_another(1));
        assert!(policy.allows_another(2));
        assert!(!policy.allows_another(3));
    }

    #[test]
    fn from_config_converts_units() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 7,
            base_delay_ms: 250,
            max_delay_ms: 4000,
            jitter_fraction: 0.1,
        });

        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_millis(4000));
    }
}
