//! Authorization request side: scope normalization, PKCE, request building,
//! and pending-transaction storage.

pub mod authorize;
pub mod pkce;
pub mod scope;
pub mod transaction;

pub use authorize::{
    AuthorizationParams, AuthorizationRequestBuilder, AuthorizeRequest, PkceTransaction,
    ResponseMode,
};
pub use pkce::{generate_challenge, PkceChallenge};
pub use transaction::{TransactionManager, TransactionStorage};
