//! Popup-window transport.

use std::time::Duration;

use tracing::debug;

use super::callback::{CallbackParams, CallbackReply};
use crate::config::DEFAULT_AUTHORIZE_TIMEOUT;
use crate::error::AuthError;

/// How often a popup is checked for being closed by the user.
pub const POPUP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// An open popup window.
pub trait PopupHandle: Send + Sync {
    fn is_closed(&self) -> bool;
    fn close(&self);
}

/// Opens popup windows. The page in the popup posts its response to `reply`.
pub trait Popup: Send + Sync {
    /// Fails with [`AuthError::PopupBlocked`] when no window could be opened.
    fn open(&self, url: &str, reply: CallbackReply) -> Result<Box<dyn PopupHandle>, AuthError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PopupConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_AUTHORIZE_TIMEOUT,
            poll_interval: POPUP_POLL_INTERVAL,
        }
    }
}

/// Open the popup and wait for its response.
///
/// A popup the user closed is [`AuthError::PopupCancelled`]; running out of
/// time is [`AuthError::Timeout`]. The window is closed on every outcome.
pub async fn run_popup(
    popup: &dyn Popup,
    url: &str,
    config: PopupConfig,
) -> Result<CallbackParams, AuthError> {
    let (reply, mut response) = CallbackReply::channel();
    let handle = popup.open(url, reply)?;
    let deadline = tokio::time::sleep(config.timeout);
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(config.poll_interval);

    let result = loop {
        tokio::select! {
            biased;
            received = &mut response => {
                break received.map_err(|_| AuthError::PopupCancelled);
            }
            _ = &mut deadline => {
                debug!(timeout_ms = config.timeout.as_millis() as u64, "popup timed out");
                break Err(AuthError::Timeout {
                    timeout_ms: config.timeout.as_millis() as u64,
                });
            }
            _ = poll.tick() => {
                if handle.is_closed() {
                    debug!("popup closed by the user");
                    break Err(AuthError::PopupCancelled);
                }
            }
        }
    };
    handle.close();
    result
}
