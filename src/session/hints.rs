//! Session hint cookies.
//!
//! Hints only say a login happened on this device; they are never proof of
//! a valid session.

use std::sync::Arc;

use tracing::debug;

use super::cookies::{CookieJar, CookieSaveOptions, CookieStorage};
use crate::config::ClientOptions;

const COOKIE_PREFIX: &str = "earthoOne";
/// Unscoped marker written by older releases.
pub const LEGACY_AUTHENTICATED_COOKIE: &str = "earthoOne.is.authenticated";

pub fn authenticated_cookie(client_id: &str) -> String {
    format!("{COOKIE_PREFIX}.{client_id}.is.authenticated")
}

pub fn organization_hint_cookie(client_id: &str) -> String {
    format!("{COOKIE_PREFIX}.{client_id}.organization_hint")
}

/// The only reader and writer of hint cookies.
#[derive(Clone)]
pub struct SessionHintStore {
    storage: CookieStorage,
    client_id: String,
    cookie_domain: Option<String>,
    expiry_days: i64,
}

impl SessionHintStore {
    pub fn new(jar: Arc<dyn CookieJar>, options: &ClientOptions) -> Self {
        Self {
            storage: CookieStorage::new(jar, options.legacy_same_site_cookie),
            client_id: options.client_id.clone(),
            cookie_domain: options.cookie_domain.clone(),
            expiry_days: options.session_check_expiry_days,
        }
    }

    /// Same jar and settings, for another client id.
    pub fn for_client(&self, client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            ..self.clone()
        }
    }

    fn save_options(&self) -> CookieSaveOptions {
        CookieSaveOptions {
            days_until_expire: Some(self.expiry_days),
            cookie_domain: self.cookie_domain.clone(),
        }
    }

    /// Whether a login was recorded. The legacy unscoped cookie is moved to
    /// the client-scoped name on first read.
    pub fn is_authenticated(&self) -> bool {
        let name = authenticated_cookie(&self.client_id);
        if self.storage.get::<bool>(&name).unwrap_or(false) {
            return true;
        }
        if self
            .storage
            .get::<bool>(LEGACY_AUTHENTICATED_COOKIE)
            .unwrap_or(false)
        {
            debug!(client_id = %self.client_id, "migrating legacy session hint cookie");
            self.storage.save(&name, &true, &self.save_options());
            self.storage
                .remove(LEGACY_AUTHENTICATED_COOKIE, self.cookie_domain.as_deref());
            return true;
        }
        false
    }

    pub fn organization_hint(&self) -> Option<String> {
        self.storage
            .get(&organization_hint_cookie(&self.client_id))
    }

    /// Record a successful login, with the organization it was for.
    pub fn mark_authenticated(&self, organization: Option<&str>) {
        let options = self.save_options();
        self.storage
            .save(&authenticated_cookie(&self.client_id), &true, &options);
        let org_cookie = organization_hint_cookie(&self.client_id);
        match organization {
            Some(org) => self.storage.save(&org_cookie, &org, &options),
            None => self.storage.remove(&org_cookie, self.cookie_domain.as_deref()),
        }
    }

    /// Client ids with a hint cookie in the jar, when the jar can list them.
    pub fn hinted_client_ids(&self) -> Vec<String> {
        let prefix = format!("{COOKIE_PREFIX}.");
        let mut ids: Vec<String> = self
            .storage
            .names()
            .iter()
            .filter_map(|name| {
                let rest = name.strip_prefix(&prefix)?;
                rest.strip_suffix(".is.authenticated")
                    .or_else(|| rest.strip_suffix(".organization_hint"))
            })
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .collect();
        ids.dedup();
        ids
    }

    pub fn clear(&self) {
        let domain = self.cookie_domain.as_deref();
        self.storage
            .remove(&authenticated_cookie(&self.client_id), domain);
        self.storage
            .remove(&organization_hint_cookie(&self.client_id), domain);
    }
}
