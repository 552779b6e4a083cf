//! Logout coordination: local clearing first, then the end-session redirect.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::Url;
use tracing::{debug, warn};

use super::hints::SessionHintStore;
use crate::cache::CacheManager;
use crate::config::ClientOptions;
use crate::error::AuthError;
use crate::flow::Navigator;

/// Caller-supplied replacement for navigating to the logout URL.
pub type OpenUrl = Arc<dyn Fn(String) -> BoxFuture<'static, Result<(), AuthError>> + Send + Sync>;

/// Which client's local state to clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LogoutTarget {
    /// The configured client id.
    #[default]
    Current,
    Client(String),
    /// Every client id known to the cache or named by a hint cookie.
    All,
}

#[derive(Clone, Default)]
pub struct LogoutOptions {
    pub target: LogoutTarget,
    pub federated: bool,
    /// Clear local state only; no end-session request.
    pub local_only: bool,
    pub return_to: Option<String>,
    pub open_url: Option<OpenUrl>,
}

impl fmt::Debug for LogoutOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogoutOptions")
            .field("target", &self.target)
            .field("federated", &self.federated)
            .field("local_only", &self.local_only)
            .field("return_to", &self.return_to)
            .field("open_url", &self.open_url.is_some())
            .finish()
    }
}

impl LogoutOptions {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.local_only && self.federated {
            return Err(AuthError::InvalidArgument(
                "It is invalid to set both the `federated` and `local_only` options to `true`"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// End-session URL for `client_id`.
pub fn build_logout_url(
    options: &ClientOptions,
    client_id: Option<&str>,
    return_to: Option<&str>,
    federated: bool,
) -> Result<String, AuthError> {
    let mut url = Url::parse(&options.logout_url())
        .map_err(|err| AuthError::Configuration(format!("invalid logout endpoint: {err}")))?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(client_id) = client_id {
            query.append_pair("client_id", client_id);
        }
        if let Some(return_to) = return_to {
            query.append_pair("returnTo", return_to);
        }
        if federated {
            query.append_key_only("federated");
        }
        query.append_pair("earthoOne", &options.client_info.encoded());
    }
    Ok(url.into())
}

/// Clears cache entries and hint cookies, then hands the end-session URL
/// to the caller's handler or the navigator.
pub struct LogoutCoordinator<'a> {
    pub options: &'a ClientOptions,
    pub cache: &'a CacheManager,
    pub hints: &'a SessionHintStore,
    pub navigator: Option<&'a dyn Navigator>,
}

impl LogoutCoordinator<'_> {
    /// The configured client, every client with cached state, and every
    /// client with a hint cookie. Read before anything is cleared.
    async fn known_client_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::from([self.options.client_id.clone()]);
        match self.cache.client_ids().await {
            Ok(cached) => ids.extend(cached),
            Err(err) => warn!(error = %err, "could not list cached clients during logout"),
        }
        ids.extend(self.hints.hinted_client_ids());
        ids
    }

    pub async fn logout(&self, logout: LogoutOptions) -> Result<(), AuthError> {
        logout.validate()?;

        let client_id = match &logout.target {
            LogoutTarget::Current => Some(self.options.client_id.clone()),
            LogoutTarget::Client(id) => Some(id.clone()),
            LogoutTarget::All => None,
        };
        let targets = match client_id.as_deref() {
            Some(id) => BTreeSet::from([id.to_string()]),
            None => self.known_client_ids().await,
        };
        let cleared = match client_id.as_deref() {
            Some(id) => self.cache.remove_client(id).await,
            None => self.cache.clear().await,
        };
        if let Err(err) = &cleared {
            warn!(error = %err, "failed to clear token cache during logout");
        }
        for id in &targets {
            self.hints.for_client(id).clear();
        }
        debug!(logout_target = ?logout.target, clients = targets.len(), "local session state cleared");

        if logout.local_only {
            return cleared;
        }

        let url = build_logout_url(
            self.options,
            client_id.as_deref().or(Some(self.options.client_id.as_str())),
            logout.return_to.as_deref(),
            logout.federated,
        )?;
        if let Some(open_url) = &logout.open_url {
            open_url(url).await?;
        } else if let Some(navigator) = self.navigator {
            navigator.assign(&url);
        } else {
            return Err(AuthError::Configuration(
                "logout needs a navigator or an open_url handler".to_string(),
            ));
        }
        cleared
    }
}
