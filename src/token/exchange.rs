//! Token endpoint client and the verified code/refresh exchange.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::id_token::{IdTokenClaims, IdTokenVerifier, VerifyOptions};
use crate::config::ClientOptions;
use crate::error::AuthError;
use crate::util::Clock;

pub const CLIENT_INFO_HEADER: &str = "Eartho-Client";

/// Raw token endpoint payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenEndpointResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// A token response whose ID token has been verified.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSet {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: Option<String>,
    /// Seconds, as reported at receipt.
    pub expires_in: u64,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    pub claims: IdTokenClaims,
}

/// Authorization code plus everything needed to redeem and verify it.
#[derive(Debug, Clone)]
pub struct CodeGrant {
    pub code: String,
    pub code_verifier: String,
    pub redirect_uri: String,
    pub nonce: String,
    pub access_id: Option<String>,
    pub max_age: Option<u64>,
    pub organization: Option<String>,
}

/// A stored refresh token to trade for a new token set.
#[derive(Debug, Clone)]
pub struct RefreshGrant {
    pub refresh_token: String,
    pub redirect_uri: Option<String>,
}

/// Redeems grants for verified [`TokenSet`]s.
#[async_trait]
pub trait CodeExchange: Send + Sync {
    async fn exchange(&self, grant: CodeGrant) -> Result<TokenSet, AuthError>;

    /// Refresh-token grant. The returned set keeps `refresh_token` as sent
    /// by the server, so callers decide whether to carry the old one.
    async fn refresh(&self, grant: RefreshGrant) -> Result<TokenSet, AuthError>;
}

/// Encoding of token endpoint request bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Form,
    Json,
}

/// HTTP client for the code and refresh endpoints.
#[derive(Clone)]
pub struct TokenEndpointClient {
    http: reqwest::Client,
    token_url: String,
    refresh_url: String,
    client_id: String,
    encoding: BodyEncoding,
    client_info: String,
}

impl TokenEndpointClient {
    pub fn new(http: reqwest::Client, options: &ClientOptions) -> Self {
        Self {
            http,
            token_url: options.token_url(),
            refresh_url: options.refresh_url(),
            client_id: options.client_id.clone(),
            encoding: if options.use_form_data {
                BodyEncoding::Form
            } else {
                BodyEncoding::Json
            },
            client_info: options.client_info.encoded(),
        }
    }

    #[instrument(skip_all, level = "debug")]
    pub async fn authorization_code(
        &self,
        grant: &CodeGrant,
    ) -> Result<TokenEndpointResponse, AuthError> {
        let mut body = BTreeMap::new();
        body.insert("grant_type", grant_type::AUTHORIZATION_CODE.to_string());
        body.insert("client_id", self.client_id.clone());
        body.insert("code", grant.code.clone());
        body.insert("code_verifier", grant.code_verifier.clone());
        body.insert("redirect_uri", grant.redirect_uri.clone());
        if let Some(access_id) = &grant.access_id {
            body.insert("access_id", access_id.clone());
        }
        self.post(&self.token_url, body).await
    }

    #[instrument(skip_all, level = "debug")]
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenEndpointResponse, AuthError> {
        let mut body = BTreeMap::new();
        body.insert("grant_type", grant_type::REFRESH_TOKEN.to_string());
        body.insert("client_id", self.client_id.clone());
        body.insert("refresh_token", refresh_token.to_string());
        if let Some(redirect_uri) = redirect_uri {
            body.insert("redirect_uri", redirect_uri.to_string());
        }
        self.post(&self.refresh_url, body).await
    }

    async fn post(
        &self,
        url: &str,
        body: BTreeMap<&'static str, String>,
    ) -> Result<TokenEndpointResponse, AuthError> {
        let request = self
            .http
            .post(url)
            .header(CLIENT_INFO_HEADER, &self.client_info);
        let request = match self.encoding {
            BodyEncoding::Form => request.form(&body),
            BodyEncoding::Json => {
                let json: Map<String, Value> = body
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), Value::String(v)))
                    .collect();
                request.json(&json)
            }
        };
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<OAuthErrorBody>(&text) {
                Ok(err) => AuthError::oauth(err.error, err.error_description),
                Err(_) => AuthError::Http {
                    status: status.as_u16(),
                    message: if text.is_empty() {
                        format!("token endpoint returned {status}")
                    } else {
                        text
                    },
                },
            });
        }
        Ok(resp.json().await?)
    }
}

pub mod grant_type {
    pub const AUTHORIZATION_CODE: &str = "authorization_code";
    pub const REFRESH_TOKEN: &str = "refresh_token";
}

/// Token endpoint plus ID token verification.
///
/// Nothing unverified leaves this type: a response whose ID token is missing
/// or fails verification is an [`AuthError::InvalidIdToken`].
pub struct TokenExchangeChannel {
    endpoint: TokenEndpointClient,
    verifier: IdTokenVerifier,
    clock: Clock,
}

impl TokenExchangeChannel {
    pub fn new(endpoint: TokenEndpointClient, verifier: IdTokenVerifier, clock: Clock) -> Self {
        Self {
            endpoint,
            verifier,
            clock,
        }
    }

    async fn verified(
        &self,
        response: TokenEndpointResponse,
        options: &VerifyOptions,
    ) -> Result<TokenSet, AuthError> {
        let id_token = response.id_token.ok_or_else(|| {
            AuthError::InvalidIdToken("token response did not include an ID token".to_string())
        })?;
        let now = (self.clock)();
        let claims = self.verifier.verify(&id_token, options, now).await?;
        let expires_in = response
            .expires_in
            .unwrap_or_else(|| (claims.exp - now.timestamp()).max(0) as u64);
        debug!(expires_in, "token response verified");
        Ok(TokenSet {
            access_token: response.access_token,
            id_token,
            refresh_token: response.refresh_token,
            expires_in,
            scope: response.scope,
            token_type: response.token_type,
            claims,
        })
    }
}

#[async_trait]
impl CodeExchange for TokenExchangeChannel {
    async fn exchange(&self, grant: CodeGrant) -> Result<TokenSet, AuthError> {
        let response = self.endpoint.authorization_code(&grant).await?;
        let options = VerifyOptions {
            nonce: Some(grant.nonce),
            max_age: grant.max_age,
            organization: grant.organization,
        };
        self.verified(response, &options).await
    }

    async fn refresh(&self, grant: RefreshGrant) -> Result<TokenSet, AuthError> {
        let response = self
            .endpoint
            .refresh_token(&grant.refresh_token, grant.redirect_uri.as_deref())
            .await?;
        self.verified(response, &VerifyOptions::default()).await
    }
}
