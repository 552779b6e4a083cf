//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::AuthError;

/// Wrap a future with a timeout.
///
/// The inner future is dropped on expiry; anything it would have produced
/// afterwards is never observed by the caller.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, AuthError>>,
) -> Result<T, AuthError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::Timeout {
            timeout_ms: duration.as_millis() as u64,
        }),
    }
}
