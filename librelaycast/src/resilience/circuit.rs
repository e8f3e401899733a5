//! Circuit breaker keyed by platform
//!
//! Stops calling a platform that keeps failing, then probes recovery with a
//! bounded number of trial calls.
//!
//! State machine per key: CLOSED counts consecutive failures and opens at the
//! threshold. OPEN rejects every call until `recovery_timeout` has elapsed
//! since the last failure, then admits trials in HALF_OPEN. A trial success
//! closes the circuit; a trial failure reopens it and restarts the timer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::CircuitConfig;
use crate::error::DeliveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Per-key breaker state. All fields mutate under the manager's lock.
#[derive(Debug, Clone)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    pub opened_at: Option<Instant>,
    /// Trials admitted since entering HalfOpen
    pub half_open_trials: u32,
}

impl CircuitStats {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            opened_at: None,
            half_open_trials: 0,
        }
    }
}

/// Circuit breakers for every platform the engine talks to, created lazily
/// per key. Mutation is serialized by the map lock, giving single-writer
/// semantics per key.
pub struct CircuitBreaker {
    config: CircuitConfig,
    circuits: Mutex<HashMap<String, CircuitStats>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.config.recovery_timeout_secs)
    }

    /// Gate a call for `key`.
    ///
    /// Ok means the call may proceed (and, in HalfOpen, a trial slot has been
    /// consumed). Err(CircuitOpen) means fail fast with no network attempt.
    pub fn check(&self, key: &str) -> Result<(), DeliveryError> {
        let mut circuits = self.circuits.lock().unwrap();
        let stats = circuits
            .entry(key.to_string())
            .or_insert_with(CircuitStats::new);

        if stats.state == CircuitState::Open {
            let recovered = stats
                .last_failure_at
                .map(|at| at.elapsed() >= self.recovery_timeout())
                .unwrap_or(true);
            if recovered {
                info!(platform = key, "circuit transitioning to half-open");
                stats.state = CircuitState::HalfOpen;
                stats.half_open_trials = 0;
            }
        }

        match stats.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(DeliveryError::circuit_open(key)),
            CircuitState::HalfOpen => {
                if stats.half_open_trials < self.config.half_open_trial_limit {
                    stats.half_open_trials += 1;
                    Ok(())
                } else {
                    Err(DeliveryError::circuit_open(key))
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, key: &str) {
        let mut circuits = self.circuits.lock().unwrap();
        let stats = circuits
            .entry(key.to_string())
            .or_insert_with(CircuitStats::new);

        match stats.state {
            CircuitState::Closed => {
                stats.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                info!(platform = key, "circuit closing after successful trial");
                *stats = CircuitStats::new();
            }
            CircuitState::Open => {
                // A success while open means a call slipped through before
                // the breaker tripped; keep rejecting until the timeout.
                warn!(platform = key, "success recorded on open circuit");
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, key: &str) {
        let mut circuits = self.circuits.lock().unwrap();
        let stats = circuits
            .entry(key.to_string())
            .or_insert_with(CircuitStats::new);

        let now = Instant::now();
        stats.last_failure_at = Some(now);

        match stats.state {
            CircuitState::Closed => {
                stats.consecutive_failures += 1;
                if stats.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        platform = key,
                        failures = stats.consecutive_failures,
                        "circuit opening"
                    );
                    stats.state = CircuitState::Open;
                    stats.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                warn!(platform = key, "trial failed, circuit reopening");
                stats.state = CircuitState::Open;
                stats.opened_at = Some(now);
                stats.half_open_trials = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Current state for a key; Closed for keys never seen.
    pub fn state(&self, key: &str) -> CircuitState {
        self.circuits
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn stats(&self, key: &str) -> Option<CircuitStats> {
        self.circuits.lock().unwrap().get(key).cloned()
    }

    /// Force a key to a state (tests and admin tooling).
    pub fn force_state(&self, key: &str, state: CircuitState) {
        let mut circuits = self.circuits.lock().unwrap();
        let stats = circuits
            .entry(key.to_string())
            .or_insert_with(CircuitStats::new);

        *stats = CircuitStats::new();
        stats.state = state;
        if state == CircuitState::Open {
            stats.last_failure_at = Some(Instant::now());
            stats.opened_at = Some(Instant::now());
        }
    }
}
