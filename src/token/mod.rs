//! Token exchange: endpoint client, ID token verification, signing keys,
//! and the isolated exchange worker.

pub mod exchange;
pub mod id_token;
pub mod jwks;
pub mod worker;

pub use exchange::{
    CodeExchange, CodeGrant, RefreshGrant, TokenEndpointClient, TokenExchangeChannel, TokenSet,
};
pub use id_token::{Audience, IdTokenClaims, IdTokenVerifier, User, VerifyOptions};
pub use jwks::{JwksKeySource, KeySource, StaticKeySource};
pub use worker::{TokenWorker, WorkerRequest, WorkerResponse};
