//! Mock platform adapter for testing
//!
//! Scriptable stand-in used by unit and integration tests: fail a fixed
//! number of times then succeed, fail always with a chosen error, inject
//! latency, count calls, and capture delivered payloads.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::DeliveryError;
use crate::platforms::Platform;
use crate::rate_limiter::RateLimitHint;
use crate::types::PlatformPayload;

/// What the mock does on each call, in order. Once the script is exhausted
/// the mock succeeds.
#[derive(Debug, Clone)]
pub enum MockStep {
    Succeed,
    Fail(DeliveryError),
}

pub struct MockPlatform {
    name: String,
    script: Mutex<Vec<MockStep>>,
    delay: Duration,
    credentials_valid: bool,
    hint: Mutex<Option<RateLimitHint>>,
    call_count: AtomicUsize,
    delivered: Mutex<Vec<PlatformPayload>>,
}

impl MockPlatform {
    /// A mock that always succeeds.
    pub fn succeeding(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name, Vec::new()))
    }

    /// A mock that fails `failures` times with transient errors, then
    /// succeeds.
    pub fn flaky(name: &str, failures: usize) -> Arc<Self> {
        let script = (0..failures)
            .map(|_| MockStep::Fail(DeliveryError::transient("HTTP 503: service unavailable")))
            .collect();
        Arc::new(Self::new(name, script))
    }

    /// A mock that always fails with the given error.
    pub fn failing(name: &str, error: DeliveryError) -> Arc<Self> {
        let mut mock = Self::new(name, Vec::new());
        mock.script = Mutex::new(vec![MockStep::Fail(error); 1000]);
        Arc::new(mock)
    }

    /// A mock that sleeps before answering, to exercise timeouts.
    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        let mut mock = Self::new(name, Vec::new());
        mock.delay = delay;
        Arc::new(mock)
    }

    pub fn with_script(name: &str, script: Vec<MockStep>) -> Arc<Self> {
        Arc::new(Self::new(name, script))
    }

    fn new(name: &str, script: Vec<MockStep>) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(script),
            delay: Duration::ZERO,
            credentials_valid: true,
            hint: Mutex::new(None),
            call_count: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// Number of `post` calls made so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Payloads that reached the platform (successful calls only).
    pub fn delivered(&self) -> Vec<PlatformPayload> {
        self.delivered.lock().unwrap().clone()
    }

    /// Make the next call report the given rate state.
    pub fn set_rate_limit_hint(&self, hint: RateLimitHint) {
        *self.hint.lock().unwrap() = Some(hint);
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn post(&self, payload: &PlatformPayload) -> Result<String, DeliveryError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let step = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                MockStep::Succeed
            } else {
                script.remove(0)
            }
        };

        match step {
            MockStep::Succeed => {
                self.delivered.lock().unwrap().push(payload.clone());
                Ok(format!("{}:mock-{}", self.name, uuid::Uuid::new_v4()))
            }
            MockStep::Fail(error) => Err(error),
        }
    }

    async fn validate_credentials(&self) -> bool {
        self.credentials_valid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn rate_limit_hint(&self) -> Option<RateLimitHint> {
        *self.hint.lock().unwrap()
    }
}
