//! Client configuration (layered: code > env > profile file).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::auth::authorize::AuthorizationParams;
use crate::error::AuthError;

pub const DEFAULT_DOMAIN: &str = "one.eartho.world";
pub const DEFAULT_ISSUER: &str = "https://one.eartho.world/";
pub const DEFAULT_API_BASE: &str = "https://api.eartho.world";
pub const DEFAULT_SCOPE: &str = "openid profile email";
pub const DEFAULT_AUTHORIZE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(60);
pub const DEFAULT_EXPIRY_SKEW: Duration = Duration::from_secs(60);
pub const DEFAULT_SESSION_CHECK_EXPIRY_DAYS: i64 = 1;

/// Where cached token entries live.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum CacheLocation {
    /// Cleared when the engine is dropped.
    #[default]
    Memory,
    /// Survives restarts; one file per origin under the cache directory.
    LocalStorage,
}

/// SDK identification sent with every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "eartho-one-rs".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ClientInfo {
    /// Base64 of the JSON form, as carried by the `earthoOne` query parameter
    /// and the `Eartho-Client` header.
    pub fn encoded(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        STANDARD.encode(json)
    }
}

/// Options for one client id.
///
/// # Example
/// ```
/// use eartho_one::config::ClientOptions;
///
/// let options = ClientOptions::builder()
///     .client_id("my-client")
///     .redirect_uri("https://app.example.com/callback")
///     .build();
/// assert_eq!(options.audience(), "my-client");
/// ```
#[derive(Debug, Clone, Builder)]
pub struct ClientOptions {
    #[builder(into)]
    pub client_id: String,
    #[builder(into)]
    pub domain: Option<String>,
    #[builder(into)]
    pub issuer: Option<String>,
    #[builder(into)]
    pub audience: Option<String>,
    #[builder(into)]
    pub redirect_uri: Option<String>,
    /// `None` uses [`DEFAULT_SCOPE`]; `Some("")` removes the defaults.
    #[builder(into)]
    pub default_scope: Option<String>,
    #[builder(into)]
    pub scope: Option<String>,
    #[builder(default = true)]
    pub use_refresh_tokens: bool,
    #[builder(default)]
    pub cache_location: CacheLocation,
    pub cache_dir: Option<PathBuf>,
    #[builder(default = DEFAULT_AUTHORIZE_TIMEOUT)]
    pub authorize_timeout: Duration,
    #[builder(default = DEFAULT_HTTP_TIMEOUT)]
    pub http_timeout: Duration,
    #[builder(default = DEFAULT_LEEWAY)]
    pub leeway: Duration,
    pub max_age: Option<u64>,
    #[builder(default = DEFAULT_EXPIRY_SKEW)]
    pub expiry_skew: Duration,
    #[builder(default = DEFAULT_SESSION_CHECK_EXPIRY_DAYS)]
    pub session_check_expiry_days: i64,
    #[builder(into)]
    pub cookie_domain: Option<String>,
    #[builder(default = true)]
    pub legacy_same_site_cookie: bool,
    #[builder(default = false)]
    pub use_cookies_for_transactions: bool,
    #[builder(default = true)]
    pub use_form_data: bool,
    #[builder(default = true)]
    pub use_token_worker: bool,
    #[builder(default)]
    pub authorization_params: AuthorizationParams,
    #[builder(into)]
    pub authorize_endpoint: Option<String>,
    #[builder(into)]
    pub token_endpoint: Option<String>,
    #[builder(into)]
    pub refresh_endpoint: Option<String>,
    #[builder(into)]
    pub logout_endpoint: Option<String>,
    #[builder(into)]
    pub jwks_uri: Option<String>,
    #[builder(default)]
    pub client_info: ClientInfo,
}

impl ClientOptions {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Configuration("client_id is required".to_string()));
        }
        if self.session_check_expiry_days <= 0 {
            return Err(AuthError::Configuration(
                "session_check_expiry_days must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Domain with a scheme, without a trailing slash.
    pub fn domain_url(&self) -> String {
        let domain = self.domain.as_deref().unwrap_or(DEFAULT_DOMAIN);
        let domain = domain.trim_end_matches('/');
        if domain.starts_with("https://") || domain.starts_with("http://") {
            domain.to_string()
        } else {
            format!("https://{domain}")
        }
    }

    /// Expected `iss` claim.
    pub fn token_issuer(&self) -> String {
        match self.issuer.as_deref() {
            Some(issuer) if issuer.starts_with("https://") || issuer.starts_with("http://") => {
                issuer.to_string()
            }
            Some(issuer) => format!("https://{issuer}/"),
            None => DEFAULT_ISSUER.to_string(),
        }
    }

    /// Audience for token requests; the client id when none is configured.
    pub fn audience(&self) -> &str {
        self.audience.as_deref().unwrap_or(&self.client_id)
    }

    pub fn default_scope(&self) -> &str {
        self.default_scope.as_deref().unwrap_or(DEFAULT_SCOPE)
    }

    pub fn authorize_url(&self) -> String {
        self.authorize_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/connect", self.domain_url()))
    }

    pub fn token_url(&self) -> String {
        self.token_endpoint
            .clone()
            .unwrap_or_else(|| format!("{DEFAULT_API_BASE}/access/oauth/token"))
    }

    pub fn refresh_url(&self) -> String {
        self.refresh_endpoint
            .clone()
            .unwrap_or_else(|| format!("{DEFAULT_API_BASE}/access/oauth/refreshtoken"))
    }

    pub fn logout_url(&self) -> String {
        self.logout_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/v2/logout", self.domain_url()))
    }

    pub fn jwks_url(&self) -> String {
        self.jwks_uri
            .clone()
            .unwrap_or_else(|| format!("{}/.well-known/jwks.json", self.domain_url()))
    }

    /// Default directory for the persistent cache (`~/.eartho`).
    pub fn default_cache_dir() -> PathBuf {
        default_eartho_dir()
    }

    /// Load from environment variables (`EARTHO_CLIENT_ID`, `EARTHO_DOMAIN`, ...).
    pub fn from_env() -> Result<Self, AuthError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let client_id = std::env::var("EARTHO_CLIENT_ID").map_err(|_| {
            AuthError::Configuration("Environment variable EARTHO_CLIENT_ID not set".to_string())
        })?;
        let options = Self::builder()
            .client_id(client_id)
            .maybe_domain(std::env::var("EARTHO_DOMAIN").ok())
            .maybe_issuer(std::env::var("EARTHO_ISSUER").ok())
            .maybe_audience(std::env::var("EARTHO_AUDIENCE").ok())
            .maybe_redirect_uri(std::env::var("EARTHO_REDIRECT_URI").ok())
            .maybe_scope(std::env::var("EARTHO_SCOPE").ok())
            .build();
        options.validate()?;
        Ok(options)
    }

    /// Load a TOML profile.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AuthError::Configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        let profile: ClientProfile = toml::from_str(&raw)?;
        let options = profile.into_options();
        options.validate()?;
        Ok(options)
    }
}

/// On-disk form of [`ClientOptions`]; only the commonly configured subset.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientProfile {
    client_id: String,
    domain: Option<String>,
    issuer: Option<String>,
    audience: Option<String>,
    redirect_uri: Option<String>,
    default_scope: Option<String>,
    scope: Option<String>,
    use_refresh_tokens: Option<bool>,
    cache_location: Option<CacheLocation>,
    cache_dir: Option<PathBuf>,
    authorize_timeout_secs: Option<u64>,
    http_timeout_secs: Option<u64>,
    token_endpoint: Option<String>,
    refresh_endpoint: Option<String>,
}

impl ClientProfile {
    fn into_options(self) -> ClientOptions {
        ClientOptions::builder()
            .client_id(self.client_id)
            .maybe_domain(self.domain)
            .maybe_issuer(self.issuer)
            .maybe_audience(self.audience)
            .maybe_redirect_uri(self.redirect_uri)
            .maybe_default_scope(self.default_scope)
            .maybe_scope(self.scope)
            .use_refresh_tokens(self.use_refresh_tokens.unwrap_or(true))
            .cache_location(self.cache_location.unwrap_or_default())
            .maybe_cache_dir(self.cache_dir)
            .authorize_timeout(
                self.authorize_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_AUTHORIZE_TIMEOUT),
            )
            .http_timeout(
                self.http_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT),
            )
            .maybe_token_endpoint(self.token_endpoint)
            .maybe_refresh_endpoint(self.refresh_endpoint)
            .build()
    }
}

fn default_eartho_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".eartho"))
        .unwrap_or_else(|| PathBuf::from(".eartho"))
}
