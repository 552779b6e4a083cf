//! Error types for the Eartho One client.

use strum::Display;
use thiserror::Error;

/// Provider error codes that mean "the user has to interact", not "something broke".
pub const RECOVERABLE_ERRORS: &[&str] = &[
    "login_required",
    "consent_required",
    "interaction_required",
    "account_selection_required",
    "access_denied",
];

/// Normalized errors for every token and authorization operation.
///
/// `Clone` so one failed refresh can be reported to every caller that was
/// waiting on it.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("Secure random or digest primitive unavailable: {0}")]
    CryptoUnavailable(String),

    #[error("Invalid state: callback state does not match the pending transaction")]
    StateMismatch,

    #[error("No pending authorization transaction")]
    MissingTransaction,

    #[error("Invalid ID token: {0}")]
    InvalidIdToken(String),

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Popup closed by the user")]
    PopupCancelled,

    #[error("Unable to open a popup window")]
    PopupBlocked,

    #[error("{error}: {}", .error_description.as_deref().unwrap_or("no description"))]
    OAuth {
        error: String,
        error_description: Option<String>,
        state: Option<String>,
    },

    #[error("Missing refresh token")]
    MissingRefreshToken,

    #[error("Could not acquire lock {0}")]
    LockTimeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error (status {status}): {message}")]
    Http { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by callers to pick a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    Crypto,
    Integrity,
    Timeout,
    Cancelled,
    Provider,
    Network,
    Storage,
    Configuration,
    Internal,
}

impl AuthError {
    /// Provider-reported OAuth error with an optional description.
    pub fn oauth(error: impl Into<String>, description: Option<String>) -> Self {
        Self::OAuth {
            error: error.into(),
            error_description: description,
            state: None,
        }
    }

    pub fn login_required() -> Self {
        Self::oauth("login_required", Some("Login required".to_string()))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::CryptoUnavailable(_) => ErrorCategory::Crypto,
            Self::StateMismatch | Self::MissingTransaction | Self::InvalidIdToken(_) => {
                ErrorCategory::Integrity
            }
            Self::Timeout { .. } | Self::LockTimeout(_) => ErrorCategory::Timeout,
            Self::PopupCancelled | Self::PopupBlocked => ErrorCategory::Cancelled,
            Self::OAuth { .. } | Self::MissingRefreshToken => ErrorCategory::Provider,
            Self::Network(_) | Self::Http { .. } => ErrorCategory::Network,
            Self::Serialization(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Configuration(_) | Self::InvalidArgument(_) => ErrorCategory::Configuration,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// The provider's `error` code, when this came from the authorization server.
    pub fn oauth_code(&self) -> Option<&str> {
        match self {
            Self::OAuth { error, .. } => Some(error.as_str()),
            _ => None,
        }
    }

    /// Whether this is a provider answer that only asks for user interaction.
    pub fn is_recoverable(&self) -> bool {
        self.oauth_code()
            .map(|code| RECOVERABLE_ERRORS.contains(&code))
            .unwrap_or(false)
    }

    /// Only lock contention is retried. Integrity and provider errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout(_))
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Network(format!("request timed out: {error}"));
        }
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        Self::InvalidIdToken(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AuthError>;
