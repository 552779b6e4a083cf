//! Credential fingerprints (cache keys).

use std::collections::BTreeMap;
use std::fmt;

use crate::auth::scope::scope_set;

pub const CACHE_KEY_PREFIX: &str = "@@earthoOne@@";
const SEPARATOR: &str = "::";

/// Deterministic cache key for one credential.
///
/// Scopes are stored as a sorted set, so `"openid profile"` and
/// `"profile openid"` produce the same fingerprint, while any difference in
/// client, audience, scope set, or custom parameters produces a different one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub client_id: String,
    pub audience: String,
    pub scope: String,
    pub params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(client_id: &str, audience: &str, scope: &str) -> Self {
        let scope = scope_set(scope).into_iter().collect::<Vec<_>>().join(" ");
        Self {
            client_id: client_id.to_string(),
            audience: audience.to_string(),
            scope,
            params: BTreeMap::new(),
        }
    }

    pub fn with_params(mut self, params: &BTreeMap<String, String>) -> Self {
        self.params = params.clone();
        self
    }

    pub fn to_key(&self) -> String {
        let mut key = [
            CACHE_KEY_PREFIX,
            self.client_id.as_str(),
            self.audience.as_str(),
            self.scope.as_str(),
        ]
        .join(SEPARATOR);
        if !self.params.is_empty() {
            let params = self
                .params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            key.push_str(SEPARATOR);
            key.push_str(&params);
        }
        key
    }

    /// Parse a key produced by [`to_key`](Self::to_key).
    pub fn from_key(key: &str) -> Option<Self> {
        let mut parts = key.splitn(5, SEPARATOR);
        if parts.next()? != CACHE_KEY_PREFIX {
            return None;
        }
        let client_id = parts.next()?.to_string();
        let audience = parts.next()?.to_string();
        let scope = parts.next()?.to_string();
        let params = parts
            .next()
            .map(|raw| {
                raw.split('&')
                    .filter_map(|pair| pair.split_once('='))
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            client_id,
            audience,
            scope,
            params,
        })
    }

    /// Same credential family (client, audience, params) regardless of scope.
    pub fn same_family(&self, other: &CacheKey) -> bool {
        self.client_id == other.client_id
            && self.audience == other.audience
            && self.params == other.params
    }

    /// Whether this key's scopes include every scope of `other`.
    pub fn covers_scope_of(&self, other: &CacheKey) -> bool {
        let mine = scope_set(&self.scope);
        scope_set(&other.scope).is_subset(&mine)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_order_does_not_change_fingerprint() {
        let a = CacheKey::new("client", "api", "openid profile email");
        let b = CacheKey::new("client", "api", "email  openid profile openid");
        assert_eq!(a, b);
        assert_eq!(a.to_key(), b.to_key());
    }

    #[test]
    fn different_scope_or_audience_changes_fingerprint() {
        let base = CacheKey::new("client", "api", "openid profile");
        assert_ne!(base, CacheKey::new("client", "api", "openid"));
        assert_ne!(base, CacheKey::new("client", "other-api", "openid profile"));
        assert_ne!(base, CacheKey::new("client-2", "api", "openid profile"));
    }

    #[test]
    fn custom_params_are_part_of_fingerprint() {
        let mut params = BTreeMap::new();
        params.insert("tenant".to_string(), "acme".to_string());
        let plain = CacheKey::new("client", "api", "openid");
        let with_params = plain.clone().with_params(&params);
        assert_ne!(plain.to_key(), with_params.to_key());
    }

    #[test]
    fn key_parses_back() {
        let mut params = BTreeMap::new();
        params.insert("tenant".to_string(), "acme".to_string());
        let key = CacheKey::new("client", "https://api.example.com", "openid profile")
            .with_params(&params);
        assert_eq!(
            key.to_key(),
            "@@earthoOne@@::client::https://api.example.com::openid profile::tenant=acme"
        );
        assert_eq!(CacheKey::from_key(&key.to_key()), Some(key));
        assert_eq!(CacheKey::from_key("other::client::a::b"), None);
    }

    #[test]
    fn superset_scope_covers_subset() {
        let wide = CacheKey::new("c", "a", "openid profile email");
        let narrow = CacheKey::new("c", "a", "openid email");
        assert!(wide.same_family(&narrow));
        assert!(wide.covers_scope_of(&narrow));
        assert!(!narrow.covers_scope_of(&wide));
    }
}
