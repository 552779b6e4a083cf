//! Signing-key sources for ID token verification.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::AuthError;

pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(600);

const RSA_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

const HMAC_ALGORITHMS: &[Algorithm] = &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Resolves the key that signed an ID token.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn decoding_key(&self, kid: Option<&str>, alg: Algorithm)
        -> Result<DecodingKey, AuthError>;
}

/// A single pinned key (RSA public key or shared secret).
#[derive(Clone)]
pub struct StaticKeySource {
    key: DecodingKey,
    algorithms: &'static [Algorithm],
}

impl StaticKeySource {
    pub fn hmac(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            algorithms: HMAC_ALGORITHMS,
        }
    }

    pub fn rsa_pem(pem: &[u8]) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|err| AuthError::Configuration(format!("invalid RSA public key: {err}")))?;
        Ok(Self {
            key,
            algorithms: RSA_ALGORITHMS,
        })
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn decoding_key(
        &self,
        _kid: Option<&str>,
        alg: Algorithm,
    ) -> Result<DecodingKey, AuthError> {
        if !self.algorithms.contains(&alg) {
            return Err(AuthError::InvalidIdToken(format!(
                "signature algorithm {alg:?} is not accepted"
            )));
        }
        Ok(self.key.clone())
    }
}

/// A JWK as published by the provider.
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    #[serde(rename = "use")]
    use_: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

/// Keys fetched from the provider's JWKS URI, cached for a TTL.
///
/// An unknown `kid` forces a refetch so key rotation is picked up without
/// waiting for the TTL.
pub struct JwksKeySource {
    client: reqwest::Client,
    uri: String,
    ttl: Duration,
    keys: RwLock<HashMap<String, (String, String)>>,
    last_refresh: RwLock<Option<Instant>>,
}

impl JwksKeySource {
    pub fn new(client: reqwest::Client, uri: impl Into<String>) -> Self {
        Self {
            client,
            uri: uri.into(),
            ttl: DEFAULT_JWKS_TTL,
            keys: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[instrument(skip(self), level = "debug")]
    async fn fetch_and_store(&self) -> Result<(), AuthError> {
        let resp = self.client.get(&self.uri).send().await?;
        if !resp.status().is_success() {
            return Err(AuthError::Http {
                status: resp.status().as_u16(),
                message: "JWKS fetch failed".to_string(),
            });
        }
        let jwks: JwkSet = resp.json().await?;
        let mut keys = self.keys.write().await;
        keys.clear();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" || jwk.use_.as_deref().is_some_and(|u| u != "sig") {
                continue;
            }
            if let (Some(n), Some(e)) = (jwk.n, jwk.e) {
                keys.insert(jwk.kid.unwrap_or_default(), (n, e));
            }
        }
        debug!(count = keys.len(), "stored JWKS signing keys");
        *self.last_refresh.write().await = Some(Instant::now());
        Ok(())
    }

    async fn is_stale(&self) -> bool {
        match *self.last_refresh.read().await {
            Some(at) => at.elapsed() > self.ttl,
            None => true,
        }
    }
}

#[async_trait]
impl KeySource for JwksKeySource {
    async fn decoding_key(
        &self,
        kid: Option<&str>,
        alg: Algorithm,
    ) -> Result<DecodingKey, AuthError> {
        if !RSA_ALGORITHMS.contains(&alg) {
            return Err(AuthError::InvalidIdToken(format!(
                "signature algorithm {alg:?} is not accepted"
            )));
        }
        let kid = kid.unwrap_or_default();
        let missing = !self.keys.read().await.contains_key(kid);
        if missing || self.is_stale().await {
            self.fetch_and_store().await?;
        }
        let keys = self.keys.read().await;
        let (n, e) = keys.get(kid).ok_or_else(|| {
            AuthError::InvalidIdToken(format!("no published signing key for kid {kid:?}"))
        })?;
        DecodingKey::from_rsa_components(n, e)
            .map_err(|err| AuthError::InvalidIdToken(format!("invalid published key: {err}")))
    }
}
