//! Authorization request building.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::pkce;
use super::scope;
use crate::config::ClientOptions;
use crate::error::AuthError;
use crate::util::{system_clock, Clock};

/// Query keys the builder owns; callers cannot override them through `extra`.
const RESERVED_PARAMS: &[&str] = &[
    "client_id",
    "response_type",
    "response_mode",
    "state",
    "nonce",
    "code_challenge",
    "code_challenge_method",
    "redirect_uri",
    "scope",
    "audience",
];

/// How the authorization server returns the callback parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    #[default]
    Query,
    Fragment,
    WebMessage,
}

/// Caller-supplied authorization parameters.
///
/// Client-level defaults live in [`ClientOptions::authorization_params`];
/// per-call values win on key collision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationParams {
    pub scope: Option<String>,
    pub audience: Option<String>,
    pub redirect_uri: Option<String>,
    /// Eartho access (product) identifier.
    pub access_id: Option<String>,
    pub organization: Option<String>,
    pub max_age: Option<u64>,
    pub prompt: Option<String>,
    /// Provider-specific extras, sent verbatim and part of the cache fingerprint.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl AuthorizationParams {
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn with_access_id(mut self, access_id: impl Into<String>) -> Self {
        self.access_id = Some(access_id.into());
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Overlay `self` on `defaults`; fields set on `self` win.
    pub fn merged_over(&self, defaults: &AuthorizationParams) -> AuthorizationParams {
        let mut extra = defaults.extra.clone();
        extra.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        AuthorizationParams {
            scope: self.scope.clone().or_else(|| defaults.scope.clone()),
            audience: self.audience.clone().or_else(|| defaults.audience.clone()),
            redirect_uri: self
                .redirect_uri
                .clone()
                .or_else(|| defaults.redirect_uri.clone()),
            access_id: self.access_id.clone().or_else(|| defaults.access_id.clone()),
            organization: self
                .organization
                .clone()
                .or_else(|| defaults.organization.clone()),
            max_age: self.max_age.or(defaults.max_age),
            prompt: self.prompt.clone().or_else(|| defaults.prompt.clone()),
            extra,
        }
    }

    /// Extras that may go on the wire.
    pub fn custom_params(&self) -> BTreeMap<String, String> {
        self.extra
            .iter()
            .filter(|(key, _)| !RESERVED_PARAMS.contains(&key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// State held for exactly one authorization round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PkceTransaction {
    pub code_verifier: String,
    pub state: String,
    pub nonce: String,
    pub redirect_uri: String,
    pub scope: String,
    pub audience: String,
    #[serde(default)]
    pub custom_params: BTreeMap<String, String>,
    pub organization: Option<String>,
    #[serde(default)]
    pub access_id: Option<String>,
    #[serde(default)]
    pub max_age: Option<u64>,
    pub app_state: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A built authorize URL together with the transaction to persist.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub url: String,
    pub transaction: PkceTransaction,
}

/// Builds `/connect` (authorize) URLs for one client configuration.
pub struct AuthorizationRequestBuilder<'a> {
    options: &'a ClientOptions,
    clock: Clock,
}

impl<'a> AuthorizationRequestBuilder<'a> {
    pub fn new(options: &'a ClientOptions) -> Self {
        Self {
            options,
            clock: system_clock(),
        }
    }

    /// Stamp transactions with `clock` instead of the system time.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Resolve the effective scope for per-call params.
    pub fn scope_for(&self, params: &AuthorizationParams) -> String {
        let merged = params.merged_over(&self.options.authorization_params);
        let requested = scope::unique_scopes([
            self.options.scope.as_deref(),
            merged.scope.as_deref(),
        ]);
        scope::normalize(
            Some(self.options.default_scope()),
            Some(requested.as_str()),
            self.options.use_refresh_tokens,
        )
    }

    /// Resolve the effective audience for per-call params.
    pub fn audience_for(&self, params: &AuthorizationParams) -> String {
        params
            .merged_over(&self.options.authorization_params)
            .audience
            .unwrap_or_else(|| self.options.audience().to_string())
    }

    /// Build the authorize URL and a fresh transaction.
    ///
    /// `response_type` is always `code` and `code_challenge_method` always
    /// `S256`; extras cannot override either.
    pub fn build(
        &self,
        params: &AuthorizationParams,
        response_mode: ResponseMode,
        app_state: Option<serde_json::Value>,
    ) -> Result<AuthorizeRequest, AuthError> {
        let merged = params.merged_over(&self.options.authorization_params);
        let redirect_uri = merged
            .redirect_uri
            .clone()
            .or_else(|| self.options.redirect_uri.clone())
            .ok_or_else(|| AuthError::Configuration("redirect_uri is required".to_string()))?;

        let state = pkce::random_token()?;
        let nonce = pkce::random_token()?;
        let challenge = pkce::generate_challenge()?;
        let scope = self.scope_for(params);
        let audience = self.audience_for(params);
        let custom_params = merged.custom_params();
        let max_age = merged.max_age.or(self.options.max_age);

        let mut url = Url::parse(&self.options.authorize_url()).map_err(|err| {
            AuthError::Configuration(format!("invalid authorize endpoint: {err}"))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.options.client_id);
            for (key, value) in &custom_params {
                query.append_pair(key, value);
            }
            query
                .append_pair("audience", &audience)
                .append_pair("scope", &scope)
                .append_pair("response_type", "code")
                .append_pair("response_mode", &response_mode.to_string())
                .append_pair("state", &state)
                .append_pair("nonce", &nonce)
                .append_pair("redirect_uri", &redirect_uri)
                .append_pair("code_challenge", &challenge.challenge)
                .append_pair("code_challenge_method", "S256");
            if let Some(access_id) = merged.access_id.as_deref() {
                query.append_pair("access_id", access_id);
            }
            if let Some(organization) = merged.organization.as_deref() {
                query.append_pair("organization", organization);
            }
            if let Some(max_age) = max_age {
                query.append_pair("max_age", &max_age.to_string());
            }
            if let Some(prompt) = merged.prompt.as_deref() {
                query.append_pair("prompt", prompt);
            }
            query.append_pair("earthoOne", &self.options.client_info.encoded());
        }

        Ok(AuthorizeRequest {
            url: url.into(),
            transaction: PkceTransaction {
                code_verifier: challenge.verifier,
                state,
                nonce,
                redirect_uri,
                scope,
                audience,
                custom_params,
                organization: merged.organization,
                access_id: merged.access_id,
                max_age,
                app_state,
                created_at: (self.clock)(),
            },
        })
    }
}
