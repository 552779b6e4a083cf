//! Convenience re-exports for common use.

pub use crate::auth::AuthorizationParams;
pub use crate::cache::{CacheBackend, FileCache, InMemoryCache};
pub use crate::client::{
    CacheMode, EarthoOne, GetTokenSilentlyOptions, PopupLoginOptions, RedirectLoginOptions,
    RedirectLoginResult, TokenResponse,
};
pub use crate::config::{CacheLocation, ClientOptions};
pub use crate::context::BrowserContext;
pub use crate::error::{AuthError, Result};
pub use crate::flow::{CallbackParams, CallbackReply, Navigator, Popup, PopupHandle, SilentFrame};
pub use crate::session::{LogoutOptions, LogoutTarget};
pub use crate::token::{IdTokenClaims, User};
