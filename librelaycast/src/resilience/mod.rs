//! Resilience wrappers for outbound platform calls
//!
//! The layers compose as explicit functions rather than middleware: the
//! circuit breaker gates each attempt (an open circuit fails fast with no
//! network activity), each admitted attempt is timeout-bounded, and the
//! retry policy governs re-attempts of that timeout-bounded call.

pub mod circuit;
pub mod retry;
pub mod timeout;

pub use circuit::{CircuitBreaker, CircuitState};
pub use retry::RetryPolicy;
pub use timeout::with_timeout;

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::DeliveryError;

/// Outcome of a resilient dispatch: the final result plus how many network
/// attempts were actually made (zero when the circuit rejected the call).
#[derive(Debug)]
pub struct DispatchOutcome<T> {
    pub result: Result<T, DeliveryError>,
    pub attempts: u32,
}

/// Run `operation` under the full resilience stack for `key`.
///
/// Per attempt: circuit check, timeout-bounded call, circuit bookkeeping.
/// Retryable failures back off per `retry`; non-retryable ones surface
/// immediately. Exhaustion yields [`DeliveryError::RetriesExhausted`]
/// wrapping the last failure.
///
/// Circuit bookkeeping counts timeouts and transient failures; permanent
/// rejections and rate limits complete the call as far as the dependency's
/// health is concerned, so they count as circuit successes.
pub async fn dispatch<T, F, Fut>(
    circuit: &CircuitBreaker,
    retry: &RetryPolicy,
    call_timeout: Duration,
    key: &str,
    mut operation: F,
) -> DispatchOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DeliveryError>>,
{
    let mut attempts = 0;

    loop {
        if let Err(open) = circuit.check(key) {
            // Fail fast: no attempt consumed, retrying is pointless until
            // the recovery timeout elapses.
            return DispatchOutcome {
                result: Err(open),
                attempts,
            };
        }

        attempts += 1;
        match with_timeout(call_timeout, operation()).await {
            Ok(value) => {
                circuit.record_success(key);
                return DispatchOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(error) => {
                match error {
                    DeliveryError::Timeout { .. } | DeliveryError::Transient { .. } => {
                        circuit.record_failure(key)
                    }
                    _ => circuit.record_success(key),
                }

                if !error.is_retryable() {
                    return DispatchOutcome {
                        result: Err(error),
                        attempts,
                    };
                }

                if !retry.allows_another(attempts) {
                    warn!(
                        platform = key,
                        attempts, "retries exhausted, giving up: {error}"
                    );
                    return DispatchOutcome {
                        result: Err(DeliveryError::retries_exhausted(attempts, error)),
                        attempts,
                    };
                }

                let delay = retry.backoff_delay(attempts, &error);
                debug!(
                    platform = key,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, backing off: {error}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
