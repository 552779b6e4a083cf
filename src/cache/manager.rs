//! Expiry-aware access to a [`CacheBackend`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use super::key::{CacheKey, CACHE_KEY_PREFIX};
use super::{CacheBackend, CacheValue, CachedTokenEntry, CachedUser};
use crate::config::DEFAULT_EXPIRY_SKEW;
use crate::error::AuthError;
use crate::util::Clock;

pub const USER_KEY_PREFIX: &str = "@@user@@";

fn user_key(client_id: &str) -> String {
    format!("{USER_KEY_PREFIX}::{client_id}")
}

fn manifest_key(client_id: &str) -> String {
    format!("{CACHE_KEY_PREFIX}::{client_id}")
}

/// Client id a stored key belongs to, if it is one of ours.
fn owner_of(key: &str) -> Option<String> {
    if let Some(parsed) = CacheKey::from_key(key) {
        return Some(parsed.client_id);
    }
    key.strip_prefix(&format!("{USER_KEY_PREFIX}::"))
        .or_else(|| key.strip_prefix(&format!("{CACHE_KEY_PREFIX}::")))
        .map(ToString::to_string)
}

/// Reads and writes cached tokens, treating entries within the expiry skew
/// as absent.
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    clock: Clock,
    expiry_skew: Duration,
    manifest: Mutex<()>,
}

impl CacheManager {
    pub fn new(backend: Arc<dyn CacheBackend>, clock: Clock) -> Self {
        Self {
            backend,
            clock,
            expiry_skew: DEFAULT_EXPIRY_SKEW,
            manifest: Mutex::new(()),
        }
    }

    pub fn with_expiry_skew(mut self, expiry_skew: Duration) -> Self {
        self.expiry_skew = expiry_skew;
        self
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    fn is_fresh(&self, entry: &CachedTokenEntry) -> bool {
        let skew = chrono::Duration::from_std(self.expiry_skew)
            .unwrap_or_else(|_| chrono::Duration::zero());
        (self.clock)() + skew < entry.expires_at
    }

    async fn read_entry(&self, key: &str) -> Result<Option<CachedTokenEntry>, AuthError> {
        match self.backend.get(key).await? {
            Some(CacheValue::Entry(entry)) => Ok(Some(entry)),
            _ => Ok(None),
        }
    }

    /// Exact fingerprint first, then an entry of the same family whose
    /// scopes include the requested ones.
    async fn lookup(&self, key: &CacheKey) -> Result<Option<(String, CachedTokenEntry)>, AuthError> {
        let exact = key.to_key();
        if let Some(entry) = self.read_entry(&exact).await? {
            return Ok(Some((exact, entry)));
        }
        for candidate in self.keys_for(Some(&key.client_id)).await? {
            let Some(parsed) = CacheKey::from_key(&candidate) else {
                continue;
            };
            if parsed.same_family(key) && parsed.covers_scope_of(key) {
                if let Some(entry) = self.read_entry(&candidate).await? {
                    return Ok(Some((candidate, entry)));
                }
            }
        }
        Ok(None)
    }

    /// An unexpired entry for `key`, or `None`.
    ///
    /// Expired entries without a refresh token are dropped; those with one
    /// are kept so the refresh token stays usable.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CachedTokenEntry>, AuthError> {
        let Some((stored_key, entry)) = self.lookup(key).await? else {
            debug!(client_id = %key.client_id, audience = %key.audience, "token cache miss");
            return Ok(None);
        };
        if self.is_fresh(&entry) {
            debug!(client_id = %key.client_id, audience = %key.audience, "token cache hit");
            return Ok(Some(entry));
        }
        debug!(client_id = %key.client_id, audience = %key.audience, "cached token expired");
        if entry.refresh_token.is_none() {
            self.backend.remove(&stored_key).await?;
        }
        Ok(None)
    }

    /// The refresh token for `key`, whether or not the access token expired.
    pub async fn get_refresh_token(&self, key: &CacheKey) -> Result<Option<String>, AuthError> {
        Ok(self
            .lookup(key)
            .await?
            .and_then(|(_, entry)| entry.refresh_token))
    }

    pub async fn set(&self, key: &CacheKey, entry: CachedTokenEntry) -> Result<(), AuthError> {
        let stored_key = key.to_key();
        self.backend
            .set(&stored_key, CacheValue::Entry(entry))
            .await?;
        self.track(&key.client_id, stored_key).await
    }

    pub async fn set_user(&self, client_id: &str, user: CachedUser) -> Result<(), AuthError> {
        let stored_key = user_key(client_id);
        self.backend.set(&stored_key, CacheValue::User(user)).await?;
        self.track(client_id, stored_key).await
    }

    /// The last logged-in user, while at least one of the client's token
    /// entries is still fresh.
    pub async fn get_user(&self, client_id: &str) -> Result<Option<CachedUser>, AuthError> {
        let user = match self.backend.get(&user_key(client_id)).await? {
            Some(CacheValue::User(user)) => user,
            _ => return Ok(None),
        };
        for key in self.keys_for(Some(client_id)).await? {
            if let Some(entry) = self.read_entry(&key).await? {
                if self.is_fresh(&entry) {
                    return Ok(Some(user));
                }
            }
        }
        debug!(client_id, "cached user has no fresh token entry");
        Ok(None)
    }

    /// Every client id with something stored.
    pub async fn client_ids(&self) -> Result<BTreeSet<String>, AuthError> {
        Ok(self
            .keys_for(None)
            .await?
            .iter()
            .filter_map(|key| owner_of(key))
            .collect())
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<(), AuthError> {
        self.backend.remove(&key.to_key()).await
    }

    /// Remove every entry written for `client_id`.
    pub async fn remove_client(&self, client_id: &str) -> Result<(), AuthError> {
        for key in self.keys_for(Some(client_id)).await? {
            self.backend.remove(&key).await?;
        }
        self.forget_client(client_id).await
    }

    /// Remove every entry for every client.
    pub async fn clear(&self) -> Result<(), AuthError> {
        for key in self.keys_for(None).await? {
            self.backend.remove(&key).await?;
        }
        self.backend.remove(CACHE_KEY_PREFIX).await
    }

    /// Our keys, optionally limited to one client.
    pub async fn keys_for(&self, client_id: Option<&str>) -> Result<Vec<String>, AuthError> {
        if let Some(all) = self.backend.all_keys().await? {
            return Ok(all
                .into_iter()
                .filter(|key| match (owner_of(key), client_id) {
                    (Some(owner), Some(wanted)) => owner == wanted,
                    (Some(_), None) => true,
                    (None, _) => false,
                })
                .collect());
        }
        let clients = match client_id {
            Some(client_id) => vec![client_id.to_string()],
            None => self.manifest_keys(CACHE_KEY_PREFIX).await?.into_iter().collect(),
        };
        let mut keys = Vec::new();
        for client in clients {
            let manifest = manifest_key(&client);
            keys.extend(self.manifest_keys(&manifest).await?);
            keys.push(manifest);
        }
        Ok(keys)
    }

    async fn manifest_keys(&self, key: &str) -> Result<BTreeSet<String>, AuthError> {
        match self.backend.get(key).await? {
            Some(CacheValue::Manifest { keys }) => Ok(keys),
            _ => Ok(BTreeSet::new()),
        }
    }

    /// Record `stored_key` in the client manifest when the backend cannot
    /// enumerate its keys.
    async fn track(&self, client_id: &str, stored_key: String) -> Result<(), AuthError> {
        if self.backend.all_keys().await?.is_some() {
            return Ok(());
        }
        let _guard = self.manifest.lock().await;
        let manifest = manifest_key(client_id);
        let mut keys = self.manifest_keys(&manifest).await?;
        if keys.insert(stored_key) {
            self.backend
                .set(&manifest, CacheValue::Manifest { keys })
                .await?;
        }
        let mut clients = self.manifest_keys(CACHE_KEY_PREFIX).await?;
        if clients.insert(client_id.to_string()) {
            self.backend
                .set(CACHE_KEY_PREFIX, CacheValue::Manifest { keys: clients })
                .await?;
        }
        Ok(())
    }

    async fn forget_client(&self, client_id: &str) -> Result<(), AuthError> {
        if self.backend.all_keys().await?.is_some() {
            return Ok(());
        }
        let _guard = self.manifest.lock().await;
        let mut clients = self.manifest_keys(CACHE_KEY_PREFIX).await?;
        if clients.remove(client_id) {
            self.backend
                .set(CACHE_KEY_PREFIX, CacheValue::Manifest { keys: clients })
                .await?;
        }
        Ok(())
    }
}
