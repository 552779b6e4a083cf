//! Eartho One client.
//!
//! OAuth2/OIDC authorization code + PKCE for a single client id: builds
//! authorize requests, completes redirect, popup and hidden-frame round
//! trips, verifies ID tokens, and keeps a token cache that renews silently
//! with at most one refresh in flight per credential.
//!
//! # Quick Start
//!
//! ```no_run
//! use eartho_one::prelude::*;
//!
//! # async fn example() -> eartho_one::error::Result<()> {
//! let options = ClientOptions::from_env()?;
//! let client = EarthoOne::from_options(options)?;
//! if client.is_connected().await? {
//!     let token = client.get_access_token(Default::default()).await?;
//!     println!("{token}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod flow;
pub mod lock;
pub mod prelude;
pub mod session;
pub mod token;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

pub use client::{
    CacheMode, EarthoOne, GetTokenSilentlyOptions, PopupLoginOptions, RedirectLoginOptions,
    RedirectLoginResult, TokenResponse,
};
pub use config::{CacheLocation, ClientOptions};
pub use context::BrowserContext;
pub use error::AuthError;
