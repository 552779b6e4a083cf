//! Cookie jar seam and the storage wrapper the engine writes through.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use strum::Display;

const LEGACY_PREFIX: &str = "_legacy_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Attributes for a cookie write or removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieAttributes {
    pub expires: Option<DateTime<Utc>>,
    pub domain: Option<String>,
    pub same_site: Option<SameSite>,
    pub secure: bool,
}

/// The platform cookie store. Values are plain, non-HttpOnly strings.
pub trait CookieJar: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str, attributes: &CookieAttributes);
    fn remove(&self, name: &str, attributes: &CookieAttributes);

    /// Names of the live cookies, when the jar can list them.
    fn cookie_names(&self) -> Option<Vec<String>> {
        None
    }
}

#[derive(Debug, Clone)]
struct StoredCookie {
    value: String,
    attributes: CookieAttributes,
}

/// In-process cookie jar honoring expiry.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<HashMap<String, StoredCookie>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes last written for `name`, if the cookie is live.
    pub fn attributes(&self, name: &str) -> Option<CookieAttributes> {
        let cookies = self.cookies.lock().ok()?;
        cookies
            .get(name)
            .filter(|cookie| is_live(cookie))
            .map(|cookie| cookie.attributes.clone())
    }

    pub fn names(&self) -> Vec<String> {
        match self.cookies.lock() {
            Ok(cookies) => cookies
                .iter()
                .filter(|(_, cookie)| is_live(cookie))
                .map(|(name, _)| name.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn is_live(cookie: &StoredCookie) -> bool {
    cookie
        .attributes
        .expires
        .map(|expires| expires > Utc::now())
        .unwrap_or(true)
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        let cookies = self.cookies.lock().ok()?;
        cookies
            .get(name)
            .filter(|cookie| is_live(cookie))
            .map(|cookie| cookie.value.clone())
    }

    fn set(&self, name: &str, value: &str, attributes: &CookieAttributes) {
        if let Ok(mut cookies) = self.cookies.lock() {
            cookies.insert(
                name.to_string(),
                StoredCookie {
                    value: value.to_string(),
                    attributes: attributes.clone(),
                },
            );
        }
    }

    fn remove(&self, name: &str, _attributes: &CookieAttributes) {
        if let Ok(mut cookies) = self.cookies.lock() {
            cookies.remove(name);
        }
    }

    fn cookie_names(&self) -> Option<Vec<String>> {
        Some(self.names())
    }
}

/// Options for [`CookieStorage::save`].
#[derive(Debug, Clone, Default)]
pub struct CookieSaveOptions {
    pub days_until_expire: Option<i64>,
    pub cookie_domain: Option<String>,
}

/// JSON-valued cookie storage over a [`CookieJar`].
///
/// With `legacy_same_site`, every write is mirrored to `_legacy_<name>`
/// without a `SameSite` attribute for user agents that reject
/// `SameSite=None`, and reads fall back to the mirror.
#[derive(Clone)]
pub struct CookieStorage {
    jar: Arc<dyn CookieJar>,
    legacy_same_site: bool,
}

impl CookieStorage {
    pub fn new(jar: Arc<dyn CookieJar>, legacy_same_site: bool) -> Self {
        Self {
            jar,
            legacy_same_site,
        }
    }

    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let raw = self.jar.get(name).or_else(|| {
            self.legacy_same_site
                .then(|| self.jar.get(&legacy_name(name)))
                .flatten()
        })?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(cookie = name, error = %err, "ignoring unparseable cookie");
                None
            }
        }
    }

    pub fn save<T: Serialize>(&self, name: &str, value: &T, options: &CookieSaveOptions) {
        let Ok(raw) = serde_json::to_string(value) else {
            return;
        };
        let expires = options
            .days_until_expire
            .map(|days| Utc::now() + Duration::days(days));
        let attributes = CookieAttributes {
            expires,
            domain: options.cookie_domain.clone(),
            same_site: Some(SameSite::None),
            secure: true,
        };
        self.jar.set(name, &raw, &attributes);
        if self.legacy_same_site {
            let legacy = CookieAttributes {
                same_site: None,
                ..attributes
            };
            self.jar.set(&legacy_name(name), &raw, &legacy);
        }
    }

    pub fn remove(&self, name: &str, cookie_domain: Option<&str>) {
        let attributes = CookieAttributes {
            domain: cookie_domain.map(ToString::to_string),
            ..CookieAttributes::default()
        };
        self.jar.remove(name, &attributes);
        if self.legacy_same_site {
            self.jar.remove(&legacy_name(name), &attributes);
        }
    }

    /// Cookie names with legacy mirrors folded into their modern name.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .jar
            .cookie_names()
            .unwrap_or_default()
            .into_iter()
            .map(|name| match name.strip_prefix(LEGACY_PREFIX) {
                Some(modern) => modern.to_string(),
                None => name,
            })
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

fn legacy_name(name: &str) -> String {
    format!("{LEGACY_PREFIX}{name}")
}
