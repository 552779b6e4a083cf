//! Isolated token-exchange worker.
//!
//! The worker owns its [`TokenExchangeChannel`]. Requests carry either the
//! code, verifier, redirect URI and nonce to check, or a refresh token; the
//! reply is either the verified token set or the error. Nothing else
//! crosses the channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::exchange::{CodeExchange, CodeGrant, RefreshGrant, TokenExchangeChannel, TokenSet};
use crate::error::AuthError;

const WORKER_QUEUE: usize = 16;

/// Request message to the worker.
#[derive(Debug, Clone)]
pub enum WorkerRequest {
    Code(CodeGrant),
    Refresh(RefreshGrant),
}

/// Reply message from the worker.
#[derive(Debug, Clone)]
pub enum WorkerResponse {
    TokenSet(TokenSet),
    Error(AuthError),
}

type Envelope = (WorkerRequest, oneshot::Sender<WorkerResponse>);

/// Handle to a spawned exchange worker. Dropping it stops the worker once
/// queued requests are done.
pub struct TokenWorker {
    sender: mpsc::Sender<Envelope>,
    handled: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TokenWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(channel: Arc<TokenExchangeChannel>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Envelope>(WORKER_QUEUE);
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handled);
        let task = tokio::spawn(async move {
            while let Some((request, reply)) = receiver.recv().await {
                let result = match request {
                    WorkerRequest::Code(grant) => channel.exchange(grant).await,
                    WorkerRequest::Refresh(grant) => channel.refresh(grant).await,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let response = match result {
                    Ok(set) => WorkerResponse::TokenSet(set),
                    Err(err) => WorkerResponse::Error(err),
                };
                if reply.send(response).is_err() {
                    debug!("exchange caller went away; dropping worker reply");
                }
            }
        });
        Self {
            sender,
            handled,
            task,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Requests the worker has answered so far.
    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    async fn send(&self, request: WorkerRequest) -> Result<TokenSet, AuthError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send((request, reply))
            .await
            .map_err(|_| AuthError::Internal("token worker is not running".to_string()))?;
        match response.await {
            Ok(WorkerResponse::TokenSet(set)) => Ok(set),
            Ok(WorkerResponse::Error(err)) => Err(err),
            Err(_) => Err(AuthError::Internal(
                "token worker stopped before replying".to_string(),
            )),
        }
    }
}

#[async_trait]
impl CodeExchange for TokenWorker {
    async fn exchange(&self, grant: CodeGrant) -> Result<TokenSet, AuthError> {
        self.send(WorkerRequest::Code(grant)).await
    }

    async fn refresh(&self, grant: RefreshGrant) -> Result<TokenSet, AuthError> {
        self.send(WorkerRequest::Refresh(grant)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientOptions;
    use crate::token::exchange::TokenEndpointClient;
    use crate::token::id_token::IdTokenVerifier;
    use crate::token::jwks::StaticKeySource;
    use crate::util::fixed_clock;
    use chrono::{DateTime, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &[u8] = b"worker-test-secret";

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn worker(server: &MockServer) -> TokenWorker {
        let options = ClientOptions::builder()
            .client_id("client-1")
            .token_endpoint(format!("{}/token", server.uri()))
            .refresh_endpoint(format!("{}/refresh", server.uri()))
            .build();
        let verifier = IdTokenVerifier::new(
            options.token_issuer(),
            options.client_id.clone(),
            Arc::new(StaticKeySource::hmac(SECRET)),
        );
        TokenWorker::spawn(Arc::new(TokenExchangeChannel::new(
            TokenEndpointClient::new(reqwest::Client::new(), &options),
            verifier,
            fixed_clock(now()),
        )))
    }

    fn grant(nonce: &str) -> CodeGrant {
        CodeGrant {
            code: "code-1".to_string(),
            code_verifier: "verifier-1".to_string(),
            redirect_uri: "https://app.example.com/cb".to_string(),
            nonce: nonce.to_string(),
            access_id: None,
            max_age: None,
            organization: None,
        }
    }

    async fn mount_token(server: &MockServer) {
        mount_at(server, "/token", "nonce-1").await;
    }

    async fn mount_at(server: &MockServer, at: &str, nonce: &str) {
        let id_token = encode(
            &Header::default(),
            &json!({
                "iss": "https://one.eartho.world/",
                "sub": "user-1",
                "aud": "client-1",
                "iat": now().timestamp(),
                "exp": now().timestamp() + 600,
                "nonce": nonce,
            }),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        Mock::given(method("POST"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1",
                "id_token": id_token,
                "expires_in": 600,
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn worker_returns_the_verified_set() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        let worker = worker(&server);

        assert!(worker.is_running());
        let set = worker.exchange(grant("nonce-1")).await.unwrap();
        assert_eq!(set.access_token, "at-1");
        assert_eq!(set.claims.sub, "user-1");
    }

    #[tokio::test]
    async fn verification_errors_cross_the_channel() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        let worker = worker(&server);

        let err = worker.exchange(grant("other-nonce")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidIdToken(_)));
        assert!(worker.is_running());
    }

    #[tokio::test]
    async fn concurrent_requests_are_answered_in_turn() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        let worker = worker(&server);

        let (a, b) = tokio::join!(
            worker.exchange(grant("nonce-1")),
            worker.exchange(grant("nonce-1"))
        );
        assert_eq!(a.unwrap().access_token, "at-1");
        assert_eq!(b.unwrap().access_token, "at-1");
    }

    #[tokio::test]
    async fn refresh_grants_go_through_the_worker() {
        let server = MockServer::start().await;
        mount_at(&server, "/refresh", "unused").await;
        let worker = worker(&server);

        let set = worker
            .refresh(RefreshGrant {
                refresh_token: "rt-1".to_string(),
                redirect_uri: None,
            })
            .await
            .unwrap();
        assert_eq!(set.access_token, "at-1");
        assert_eq!(worker.handled(), 1);
    }
}
