//! Hidden-frame transport for silent authorization.

use std::time::Duration;

use tracing::debug;

use super::callback::{CallbackParams, CallbackReply};
use crate::error::AuthError;
use crate::util::timeout::with_timeout;

/// Loads an authorize URL without user interaction (hidden iframe).
pub trait SilentFrame: Send + Sync {
    /// Start loading `url`; the posted response goes to `reply`.
    fn load(&self, url: &str, reply: CallbackReply) -> Result<(), AuthError>;
}

/// Send the request and wait at most `timeout` for the response.
///
/// On timeout the receiving half is dropped, so a response posted later is
/// discarded by [`CallbackReply::resolve`].
pub async fn run_silent(
    frame: &dyn SilentFrame,
    url: &str,
    timeout: Duration,
) -> Result<CallbackParams, AuthError> {
    let (reply, response) = CallbackReply::channel();
    frame.load(url, reply)?;
    let result = with_timeout(timeout, async {
        response
            .await
            .map_err(|_| AuthError::Internal("hidden frame closed without a response".to_string()))
    })
    .await;
    if let Err(AuthError::Timeout { timeout_ms }) = &result {
        debug!(timeout_ms, "silent authorization timed out");
    }
    result
}
