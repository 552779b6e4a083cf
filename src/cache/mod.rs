//! Token cache: fingerprints, pluggable backends, and the expiry-aware manager.

pub mod file;
pub mod key;
pub mod manager;
pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::token::{IdTokenClaims, TokenSet};

pub use file::FileCache;
pub use key::{CacheKey, CACHE_KEY_PREFIX};
pub use manager::CacheManager;
pub use memory::InMemoryCache;

/// One cached credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTokenEntry {
    pub client_id: String,
    pub audience: String,
    /// Scope that was requested (the fingerprint scope).
    pub scope: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scope granted by the server, when it reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_token_scope: Option<String>,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<IdTokenClaims>,
}

impl CachedTokenEntry {
    /// Build an entry from a verified token set. `expires_at` is fixed here,
    /// at receipt.
    pub fn from_token_set(
        key: &CacheKey,
        set: &TokenSet,
        keep_refresh_token: bool,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id: key.client_id.clone(),
            audience: key.audience.clone(),
            scope: key.scope.clone(),
            access_token: set.access_token.clone(),
            id_token: Some(set.id_token.clone()),
            refresh_token: set.refresh_token.clone().filter(|_| keep_refresh_token),
            oauth_token_scope: set.scope.clone(),
            expires_in: set.expires_in,
            expires_at: received_at + Duration::seconds(set.expires_in as i64),
            claims: Some(set.claims.clone()),
        }
    }
}

/// Latest ID token for a client, kept apart from the per-fingerprint entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedUser {
    pub id_token: String,
    pub claims: IdTokenClaims,
}

/// What a backend stores under one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheValue {
    Entry(CachedTokenEntry),
    User(CachedUser),
    /// Keys written through the manager, for backends that cannot list keys.
    Manifest { keys: BTreeSet<String> },
}

/// Storage seam for cached tokens.
///
/// All calls are awaited, so in-memory, persistent and caller-supplied
/// backends share one calling path.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>, AuthError>;
    async fn set(&self, key: &str, value: CacheValue) -> Result<(), AuthError>;
    async fn remove(&self, key: &str) -> Result<(), AuthError>;

    /// Every stored key, when the backend can enumerate them.
    async fn all_keys(&self) -> Result<Option<Vec<String>>, AuthError> {
        Ok(None)
    }
}
