//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap upstream calls with a hard deadline
//! - Cancel operations cleanly on timeout
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; dropping the future aborts the fetch
//! - Timeout errors are distinct from other errors
//! - Timed-out requests return 408 Request Timeout

use std::future::Future;
use std::time::Duration;

use crate::error::ProxyError;

/// Run `fut` to completion or fail with `UpstreamTimeout` after `limit`.
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T, ProxyError>
where
    F: Future<Output = Result<T, ProxyError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProxyError::UpstreamTimeout(format!(
            "no complete response within {}s",
            limit.as_secs_f32()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_fast_results() {
        let result = with_deadline(Duration::from_secs(1), async { Ok::<_, ProxyError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn slow_future_times_out() {
        let result = with_deadline(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ProxyError>(())
        })
        .await;
        assert!(matches!(result, Err(ProxyError::UpstreamTimeout(_))));
    }

    #[tokio::test]
    async fn inner_errors_are_kept() {
        let result: Result<(), _> = with_deadline(Duration::from_secs(1), async {
            Err(ProxyError::HostNotFound("x".into()))
        })
        .await;
        assert!(matches!(result, Err(ProxyError::HostNotFound(_))));
    }
}
