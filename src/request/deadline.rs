//! Deadline controller: bounds the wall-clock time of one exchange.
//!
//! The guarded future is the whole exchange (send, headers, body). When the
//! deadline fires first, the future is dropped; dropping it aborts the
//! in-flight transport call, releases its connection and closes any download
//! handle it owns before the `TIMEOUT` error is returned. A completed
//! exchange disarms the timer by returning first, so the deadline can never
//! resolve a call twice.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::error::RequestError;

/// Runs `exchange` under an optional deadline.
///
/// `None` leaves the exchange bounded only by the transport's own timeouts.
///
/// # Errors
///
/// Returns [`RequestError::Timeout`] when the deadline elapses first, or the
/// exchange's own error.
pub(crate) async fn with_deadline<T, F>(
    url: &str,
    timeout: Option<Duration>,
    exchange: F,
) -> Result<T, RequestError>
where
    F: Future<Output = Result<T, RequestError>>,
{
    let Some(limit) = timeout else {
        return exchange.await;
    };

    match tokio::time::timeout(limit, exchange).await {
        Ok(outcome) => outcome,
        Err(_elapsed) => {
            debug!(url, timeout_ms = limit.as_millis(), "deadline elapsed; exchange aborted");
            Err(RequestError::timeout(url, limit))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::request::ErrorCode;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_no_deadline_passes_result_through() {
        let result = with_deadline("http://x", None, async { Ok::<_, RequestError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_deadline_not_reached_returns_result() {
        let result = with_deadline("http://x", Some(Duration::from_secs(5)), async {
            Ok::<_, RequestError>("done")
        })
        .await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_inner_error_is_not_converted_to_timeout() {
        let result: Result<(), _> = with_deadline("http://x", Some(Duration::from_secs(5)), async {
            Err(RequestError::truncated("http://x", 10, 1))
        })
        .await;
        assert_eq!(result.unwrap_err().code(), ErrorCode::TruncatedResponse);
    }

    #[tokio::test]
    async fn test_deadline_fires_and_drops_exchange() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(Arc::clone(&dropped));

        let result: Result<(), _> = with_deadline("http://x/slow", Some(Duration::from_millis(1)), async move {
            let _flag = flag;
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(!err.to_string().is_empty());
        assert!(dropped.load(Ordering::SeqCst), "exchange must be dropped on timeout");
    }
}
