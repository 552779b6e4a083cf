//! Authorization responses and the one-shot reply slot transports resolve.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::AuthError;

/// `code`/`error` plus `state`, as returned to the redirect URI or posted by
/// a popup or hidden frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse from a full callback URL. The query is used when it carries a
    /// response, otherwise the fragment.
    pub fn from_url(url: &str) -> Result<Self, AuthError> {
        let parsed = Url::parse(url)
            .map_err(|err| AuthError::InvalidArgument(format!("invalid callback URL: {err}")))?;
        let from_query = Self::from_pairs(parsed.query().unwrap_or_default());
        if from_query.has_response() {
            return Ok(from_query);
        }
        let from_fragment = Self::from_pairs(parsed.fragment().unwrap_or_default());
        if from_fragment.has_response() {
            return Ok(from_fragment);
        }
        Err(AuthError::InvalidArgument(
            "There are no query params available for parsing.".to_string(),
        ))
    }

    /// Parse `key=value&...` pairs.
    pub fn from_pairs(raw: &str) -> Self {
        let mut pairs: HashMap<String, String> = url::form_urlencoded::parse(raw.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self {
            code: pairs.remove("code"),
            state: pairs.remove("state"),
            error: pairs.remove("error"),
            error_description: pairs.remove("error_description"),
        }
    }

    fn has_response(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }

    /// Check `state` and turn the response into an authorization code.
    ///
    /// State is compared before anything else; a provider error with a
    /// matching state is surfaced verbatim.
    pub fn into_code(self, expected_state: &str) -> Result<String, AuthError> {
        if self.state.as_deref() != Some(expected_state) {
            return Err(AuthError::StateMismatch);
        }
        if let Some(error) = self.error {
            return Err(AuthError::OAuth {
                error,
                error_description: self.error_description,
                state: self.state,
            });
        }
        self.code.ok_or_else(|| {
            AuthError::InvalidArgument("authorization response has no code".to_string())
        })
    }
}

/// Single-use slot a transport resolves with the authorization response.
///
/// Only the first [`resolve`](Self::resolve) is delivered; anything after
/// that, or after the waiter gave up, is dropped.
#[derive(Clone)]
pub struct CallbackReply {
    slot: Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>,
}

impl CallbackReply {
    pub fn channel() -> (Self, oneshot::Receiver<CallbackParams>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(sender))),
            },
            receiver,
        )
    }

    /// Deliver `params`. Returns whether a waiter received them.
    pub fn resolve(&self, params: CallbackParams) -> bool {
        let sender = self.slot.lock().ok().and_then(|mut slot| slot.take());
        let Some(sender) = sender else {
            debug!("discarding authorization response: already resolved");
            return false;
        };
        if sender.send(params).is_err() {
            debug!("discarding late authorization response");
            return false;
        }
        true
    }

    /// Parse and deliver a callback URL.
    pub fn resolve_url(&self, url: &str) -> Result<bool, AuthError> {
        Ok(self.resolve(CallbackParams::from_url(url)?))
    }
}
