//! Timeout wrapper for outbound calls
//!
//! Dropping the timed-out future is what cancels it; any resources it holds
//! are released on drop, which is all tokio needs for cooperative
//! cancellation.

use std::future::Future;
use std::time::Duration;

use crate::error::DeliveryError;

/// Run `operation` for at most `limit`, mapping elapse to
/// [`DeliveryError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, operation: F) -> Result<T, DeliveryError>
where
    F: Future<Output = Result<T, DeliveryError>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::timeout(limit.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn fast_operation_passes_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, DeliveryError>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn slow_operation_times_out() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(DeliveryError::Timeout { elapsed_ms }) => assert_eq!(elapsed_ms, 20),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn underlying_error_passes_through() {
        let result: Result<(), _> = with_timeout(Duration::from_secs(1), async {
            Err(DeliveryError::transient("connection reset"))
        })
        .await;

        assert!(matches!(result, Err(DeliveryError::Transient { .. })));
    }

    #[tokio::test]
    async fn timed_out_future_is_dropped() {
        struct DropFlag(Arc<AtomicBool>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());

        let result: Result<(), _> = with_timeout(Duration::from_millis(10), async move {
            let _held = flag;
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(result.is_err());
        assert!(
            dropped.load(Ordering::SeqCst),
            "cancellation must release resources held by the operation"
        );
    }
}
