//! ID token verification.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::jwks::KeySource;
use crate::error::AuthError;

/// How old `iat` may be at receipt before the token is rejected.
pub const DEFAULT_MAX_IAT_AGE: Duration = Duration::from_secs(600);

/// Claims that describe the token rather than the user.
const PROTOCOL_CLAIMS: &[&str] = &[
    "iss", "aud", "exp", "nbf", "iat", "jti", "azp", "nonce", "auth_time", "at_hash", "c_hash",
    "acr", "amr", "sub_jwk", "cnf", "sid", "org_id",
];

/// `aud` is either one string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::Single(aud) => aud == value,
            Self::Many(auds) => auds.iter().any(|aud| aud == value),
        }
    }

    fn is_multiple(&self) -> bool {
        matches!(self, Self::Many(auds) if auds.len() > 1)
    }
}

/// Verified ID token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IdTokenClaims {
    /// The user profile: `sub` plus every non-protocol claim.
    pub fn user(&self) -> User {
        let profile = self
            .extra
            .iter()
            .filter(|(key, _)| !PROTOCOL_CLAIMS.contains(&key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        User {
            sub: self.sub.clone(),
            profile,
        }
    }
}

/// User profile decoded from the ID token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub sub: String,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl User {
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.profile.get(name)
    }

    pub fn email(&self) -> Option<&str> {
        self.claim("email").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.claim("name").and_then(Value::as_str)
    }
}

/// Per-token expectations.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub nonce: Option<String>,
    pub max_age: Option<u64>,
    pub organization: Option<String>,
}

/// Verifies signature and claims of ID tokens for one client.
pub struct IdTokenVerifier {
    issuer: String,
    client_id: String,
    leeway: Duration,
    max_iat_age: Duration,
    keys: Arc<dyn KeySource>,
}

impl IdTokenVerifier {
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        keys: Arc<dyn KeySource>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            leeway: crate::config::DEFAULT_LEEWAY,
            max_iat_age: DEFAULT_MAX_IAT_AGE,
            keys,
        }
    }

    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn with_max_iat_age(mut self, max_iat_age: Duration) -> Self {
        self.max_iat_age = max_iat_age;
        self
    }

    /// Verify `id_token` at time `now`.
    pub async fn verify(
        &self,
        id_token: &str,
        options: &VerifyOptions,
        now: DateTime<Utc>,
    ) -> Result<IdTokenClaims, AuthError> {
        let header = decode_header(id_token)?;
        let key = self
            .keys
            .decoding_key(header.kid.as_deref(), header.alg)
            .await?;

        // Claims are checked below against the injected clock.
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation.leeway = 0;

        let data = decode::<Map<String, Value>>(id_token, &key, &validation)?;
        let raw = data.claims;
        require_string(&raw, "iss", "Issuer")?;
        require_string(&raw, "sub", "Subject")?;
        if !raw.contains_key("aud") {
            return Err(invalid("Audience (aud) claim must be present in the ID token"));
        }
        require_number(&raw, "exp", "Expiration Time")?;
        require_number(&raw, "iat", "Issued At")?;

        let claims: IdTokenClaims = serde_json::from_value(Value::Object(raw))
            .map_err(|err| invalid(&format!("malformed claims: {err}")))?;
        self.check_claims(&claims, options, now)?;
        Ok(claims)
    }

    fn check_claims(
        &self,
        claims: &IdTokenClaims,
        options: &VerifyOptions,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let now = now.timestamp();
        let leeway = self.leeway.as_secs() as i64;

        if claims.iss != self.issuer {
            return Err(invalid(&format!(
                "Issuer (iss) claim mismatch; expected \"{}\", found \"{}\"",
                self.issuer, claims.iss
            )));
        }
        if !claims.aud.contains(&self.client_id) {
            return Err(invalid(&format!(
                "Audience (aud) claim mismatch; expected \"{}\"",
                self.client_id
            )));
        }
        if claims.aud.is_multiple() {
            match claims.azp.as_deref() {
                None => {
                    return Err(invalid(
                        "Authorized Party (azp) claim must be present when there are multiple audiences",
                    ))
                }
                Some(azp) if azp != self.client_id => {
                    return Err(invalid(&format!(
                        "Authorized Party (azp) claim mismatch; expected \"{}\", found \"{azp}\"",
                        self.client_id
                    )))
                }
                Some(_) => {}
            }
        }
        if let Some(expected) = options.nonce.as_deref() {
            match claims.nonce.as_deref() {
                Some(nonce) if nonce == expected => {}
                Some(_) => return Err(invalid("Nonce (nonce) claim mismatch")),
                None => return Err(invalid("Nonce (nonce) claim must be present")),
            }
        }
        if now > claims.exp + leeway {
            return Err(invalid(&format!(
                "Expiration Time (exp) claim error; current time ({now}) is after expiration time ({})",
                claims.exp + leeway
            )));
        }
        if let Some(nbf) = claims.nbf {
            if now < nbf - leeway {
                return Err(invalid(&format!(
                    "Not Before time (nbf) claim error; current time ({now}) is before {}",
                    nbf - leeway
                )));
            }
        }
        if claims.iat > now + leeway {
            return Err(invalid("Issued At (iat) claim is in the future"));
        }
        if now - claims.iat > self.max_iat_age.as_secs() as i64 + leeway {
            return Err(invalid("Issued At (iat) claim is too far in the past"));
        }
        if let Some(max_age) = options.max_age {
            let auth_time = claims.auth_time.ok_or_else(|| {
                invalid("Authentication Time (auth_time) claim must be present when max_age is used")
            })?;
            if now > auth_time + max_age as i64 + leeway {
                return Err(invalid(
                    "Authentication Time (auth_time) claim indicates that too much time has passed since the last end-user authentication",
                ));
            }
        }
        if let Some(organization) = options.organization.as_deref() {
            if claims.org_id.as_deref() != Some(organization) {
                return Err(invalid(&format!(
                    "Organization Id (org_id) claim mismatch; expected \"{organization}\""
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> AuthError {
    AuthError::InvalidIdToken(message.to_string())
}

fn require_string(raw: &Map<String, Value>, claim: &str, label: &str) -> Result<(), AuthError> {
    match raw.get(claim) {
        Some(Value::String(_)) => Ok(()),
        _ => Err(invalid(&format!(
            "{label} ({claim}) claim must be a string present in the ID token"
        ))),
    }
}

fn require_number(raw: &Map<String, Value>, claim: &str, label: &str) -> Result<(), AuthError> {
    match raw.get(claim) {
        Some(Value::Number(_)) => Ok(()),
        _ => Err(invalid(&format!(
            "{label} ({claim}) claim must be a number present in the ID token"
        ))),
    }
}
