//! The Eartho One client engine.

use std::sync::Arc;
use std::time::Duration;

use bon::bon;
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::{
    AuthorizationParams, AuthorizationRequestBuilder, AuthorizeRequest, PkceTransaction,
    ResponseMode, TransactionManager, TransactionStorage,
};
use crate::cache::{
    CacheBackend, CacheKey, CacheManager, CachedTokenEntry, CachedUser, FileCache, InMemoryCache,
};
use crate::config::{CacheLocation, ClientOptions};
use crate::context::BrowserContext;
use crate::error::AuthError;
use crate::flow::{
    run_popup, run_silent, AuthorizationFlow, CallbackParams, Navigator, Popup, PopupConfig,
    SilentFrame, Transport,
};
use crate::lock::{
    acquire_with_retry, CrossTabLock, SingleFlight, GET_TOKEN_SILENTLY_LOCK, LOCK_ACQUIRE_TIMEOUT,
};
use crate::session::cookies::CookieStorage;
use crate::session::{build_logout_url, LogoutCoordinator, LogoutOptions, SessionHintStore};
use crate::token::{
    CodeExchange, CodeGrant, IdTokenClaims, IdTokenVerifier, JwksKeySource, KeySource,
    RefreshGrant, TokenEndpointClient, TokenExchangeChannel, TokenSet, TokenWorker, User,
};
use crate::util::retry::RetryPolicy;
use crate::util::{system_clock, Clock};

/// How `get_token_silently` uses the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Serve from cache when fresh, renew otherwise.
    #[default]
    On,
    /// Always renew.
    Off,
    /// Never touch the network; a miss is `login_required`.
    CacheOnly,
}

#[derive(Debug, Clone, Default)]
pub struct GetTokenSilentlyOptions {
    pub cache_mode: CacheMode,
    pub authorization_params: AuthorizationParams,
    /// Hidden-frame budget; the client's `authorize_timeout` when `None`.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct RedirectLoginOptions {
    pub authorization_params: AuthorizationParams,
    pub app_state: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct RedirectLoginResult {
    pub app_state: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct PopupLoginOptions {
    pub authorization_params: AuthorizationParams,
    pub config: PopupConfig,
}

/// Token material handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenResponse {
    pub id_token: String,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Seconds until the access token expires.
    pub expires_in: u64,
}

impl TokenResponse {
    fn from_entry(entry: &CachedTokenEntry, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            id_token: entry.id_token.clone().unwrap_or_default(),
            access_token: entry.access_token.clone(),
            scope: entry
                .oauth_token_scope
                .clone()
                .or_else(|| Some(entry.scope.clone())),
            expires_in: (entry.expires_at - now).num_seconds().max(0) as u64,
        }
    }

    fn from_set(set: &TokenSet) -> Self {
        Self {
            id_token: set.id_token.clone(),
            access_token: set.access_token.clone(),
            scope: set.scope.clone(),
            expires_in: set.expires_in,
        }
    }
}

struct Inner {
    options: ClientOptions,
    cache: CacheManager,
    transactions: TransactionManager,
    hints: SessionHintStore,
    channel: Arc<TokenExchangeChannel>,
    worker: Option<TokenWorker>,
    renewals: SingleFlight<TokenResponse>,
    tab_lock: Option<Arc<dyn CrossTabLock>>,
    clock: Clock,
    navigator: Option<Arc<dyn Navigator>>,
    popup: Option<Arc<dyn Popup>>,
    silent_frame: Option<Arc<dyn SilentFrame>>,
}

/// Client-side token lifecycle for one client id.
///
/// Cheap to clone; clones share cache, locks and transports.
///
/// # Example
/// ```no_run
/// use eartho_one::{ClientOptions, EarthoOne};
///
/// # async fn run() -> Result<(), eartho_one::AuthError> {
/// let options = ClientOptions::builder()
///     .client_id("my-client")
///     .redirect_uri("https://app.example.com/callback")
///     .build();
/// let client = EarthoOne::builder().options(options).build()?;
/// let url = client.build_authorize_url(Default::default())?;
/// println!("open {url}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EarthoOne {
    inner: Arc<Inner>,
}

#[bon]
impl EarthoOne {
    #[builder]
    pub fn new(
        options: ClientOptions,
        #[builder(default)] context: BrowserContext,
        cache: Option<Arc<dyn CacheBackend>>,
        key_source: Option<Arc<dyn KeySource>>,
        clock: Option<Clock>,
        http_client: Option<reqwest::Client>,
        navigator: Option<Arc<dyn Navigator>>,
        popup: Option<Arc<dyn Popup>>,
        silent_frame: Option<Arc<dyn SilentFrame>>,
    ) -> Result<Self, AuthError> {
        options.validate()?;
        let http = match http_client {
            Some(http) => http,
            None => reqwest::Client::builder()
                .timeout(options.http_timeout)
                .build()?,
        };
        let clock = clock.unwrap_or_else(system_clock);
        let backend = cache.unwrap_or_else(|| default_backend(&options, &context));
        let keys: Arc<dyn KeySource> = key_source
            .unwrap_or_else(|| Arc::new(JwksKeySource::new(http.clone(), options.jwks_url())));

        let verifier = IdTokenVerifier::new(options.token_issuer(), options.client_id.clone(), keys)
            .with_leeway(options.leeway);
        let channel = Arc::new(TokenExchangeChannel::new(
            TokenEndpointClient::new(http, &options),
            verifier,
            clock.clone(),
        ));
        let worker = worker_for(&options, &channel);

        let transactions = TransactionManager::new(
            &options.client_id,
            if options.use_cookies_for_transactions {
                TransactionStorage::Cookie {
                    storage: CookieStorage::new(
                        context.cookies.clone(),
                        options.legacy_same_site_cookie,
                    ),
                    cookie_domain: options.cookie_domain.clone(),
                }
            } else {
                TransactionStorage::session()
            },
        );
        let hints = SessionHintStore::new(context.cookies.clone(), &options);
        let cache = CacheManager::new(backend, clock.clone()).with_expiry_skew(options.expiry_skew);

        Ok(Self {
            inner: Arc::new(Inner {
                options,
                cache,
                transactions,
                hints,
                channel,
                worker,
                renewals: SingleFlight::new(),
                tab_lock: context.tab_lock,
                clock,
                navigator,
                popup,
                silent_frame,
            }),
        })
    }
}

fn default_backend(options: &ClientOptions, context: &BrowserContext) -> Arc<dyn CacheBackend> {
    match options.cache_location {
        CacheLocation::Memory => Arc::new(InMemoryCache::new()),
        CacheLocation::LocalStorage => {
            let dir = options
                .cache_dir
                .clone()
                .unwrap_or_else(ClientOptions::default_cache_dir);
            let origin = context
                .origin
                .clone()
                .or_else(|| {
                    options
                        .redirect_uri
                        .as_deref()
                        .and_then(|uri| Url::parse(uri).ok())
                        .map(|url| url.origin().ascii_serialization())
                })
                .unwrap_or_else(|| options.client_id.clone());
            Arc::new(FileCache::for_origin(dir, &origin))
        }
    }
}

/// The exchange worker runs only for in-memory caches with refresh tokens,
/// and only when a runtime is available to host it.
fn worker_for(
    options: &ClientOptions,
    channel: &Arc<TokenExchangeChannel>,
) -> Option<TokenWorker> {
    let wanted = options.use_token_worker
        && options.use_refresh_tokens
        && options.cache_location == CacheLocation::Memory;
    if !wanted {
        return None;
    }
    if tokio::runtime::Handle::try_current().is_err() {
        debug!("no tokio runtime; exchanging tokens in-line");
        return None;
    }
    Some(TokenWorker::spawn(Arc::clone(channel)))
}

impl EarthoOne {
    /// Construct with defaults for everything but the options.
    pub fn from_options(options: ClientOptions) -> Result<Self, AuthError> {
        Self::builder().options(options).build()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Build the authorize URL and store its transaction, without navigating.
    pub fn build_authorize_url(&self, options: RedirectLoginOptions) -> Result<String, AuthError> {
        let request = AuthorizationRequestBuilder::new(&self.inner.options)
            .with_clock(self.inner.clock.clone())
            .build(
                &options.authorization_params,
                ResponseMode::Query,
                options.app_state,
            )?;
        let AuthorizeRequest { url, transaction } = request;
        self.inner.transactions.create(transaction);
        Ok(url)
    }

    /// Start a full-page redirect login. Returns the URL navigated to.
    pub fn connect_with_redirect(
        &self,
        options: RedirectLoginOptions,
    ) -> Result<String, AuthError> {
        let navigator = self.inner.navigator.clone().ok_or_else(|| {
            AuthError::Configuration("redirect login needs a navigator".to_string())
        })?;
        let url = self.build_authorize_url(options)?;
        let mut flow = AuthorizationFlow::new(Transport::Redirect);
        flow.request_sent()?;
        navigator.assign(&url);
        Ok(url)
    }

    /// Complete a redirect login from the callback URL.
    ///
    /// The pending transaction is consumed whatever the outcome, so the same
    /// callback can never be redeemed twice.
    pub async fn handle_redirect_callback(
        &self,
        url: &str,
    ) -> Result<RedirectLoginResult, AuthError> {
        let params = CallbackParams::from_url(url)?;
        let transaction = self
            .inner
            .transactions
            .take()
            .ok_or(AuthError::MissingTransaction)?;

        let mut flow = AuthorizationFlow::new(Transport::Redirect);
        flow.request_sent()?;
        flow.callback_received()?;
        let code = flow.check(params.into_code(&transaction.state))?;
        flow.exchanging()?;
        let set = flow.check(self.inner.exchange_code(&transaction, code).await)?;
        let stored = self
            .inner
            .store(
                &transaction_key(&self.inner.options, &transaction),
                &set,
                transaction.organization.as_deref(),
            )
            .await;
        flow.check(stored)?;
        flow.complete()?;
        Ok(RedirectLoginResult {
            app_state: transaction.app_state,
        })
    }

    /// Log in through a popup window.
    pub async fn connect_with_popup(&self, options: PopupLoginOptions) -> Result<(), AuthError> {
        let popup = self.inner.popup.clone().ok_or_else(|| {
            AuthError::Configuration("popup login needs a popup opener".to_string())
        })?;
        let request = AuthorizationRequestBuilder::new(&self.inner.options)
            .with_clock(self.inner.clock.clone())
            .build(
                &options.authorization_params,
                ResponseMode::WebMessage,
                None,
            )?;
        let transaction = request.transaction;

        let mut flow = AuthorizationFlow::new(Transport::Popup);
        flow.request_sent()?;
        let params = flow.check(run_popup(popup.as_ref(), &request.url, options.config).await)?;
        flow.callback_received()?;
        let code = flow.check(params.into_code(&transaction.state))?;
        flow.exchanging()?;
        let set = flow.check(self.inner.exchange_code(&transaction, code).await)?;
        let stored = self
            .inner
            .store(
                &transaction_key(&self.inner.options, &transaction),
                &set,
                transaction.organization.as_deref(),
            )
            .await;
        flow.check(stored)?;
        flow.complete()
    }

    /// The ID token for the requested scope and audience, renewing silently
    /// when the cache has nothing fresh.
    pub async fn get_token_silently(
        &self,
        options: GetTokenSilentlyOptions,
    ) -> Result<String, AuthError> {
        Ok(self.get_token_silently_verbose(options).await?.id_token)
    }

    pub async fn get_access_token(
        &self,
        options: GetTokenSilentlyOptions,
    ) -> Result<String, AuthError> {
        Ok(self.get_token_silently_verbose(options).await?.access_token)
    }

    /// Full token response.
    ///
    /// Concurrent calls for the same fingerprint share one renewal and all
    /// see its result, success or failure.
    pub async fn get_token_silently_verbose(
        &self,
        options: GetTokenSilentlyOptions,
    ) -> Result<TokenResponse, AuthError> {
        let inner = &self.inner;
        let params = options
            .authorization_params
            .merged_over(&inner.options.authorization_params);
        let key = fingerprint(&inner.options, &params);

        if options.cache_mode != CacheMode::Off {
            if let Some(entry) = inner.cache.get(&key).await? {
                return Ok(TokenResponse::from_entry(&entry, (inner.clock)()));
            }
            if options.cache_mode == CacheMode::CacheOnly {
                return Err(AuthError::login_required());
            }
        }

        let timeout = options.timeout.unwrap_or(inner.options.authorize_timeout);
        let shared = Arc::clone(inner);
        let renewal_key = key.clone();
        inner
            .renewals
            .run(&key.to_key(), move || async move {
                shared
                    .renew(renewal_key, params, timeout, options.cache_mode)
                    .await
            })
            .await
    }

    pub async fn get_user(&self) -> Result<Option<User>, AuthError> {
        Ok(self
            .inner
            .cache
            .get_user(&self.inner.options.client_id)
            .await?
            .map(|cached| cached.claims.user()))
    }

    pub async fn get_id_token_claims(&self) -> Result<Option<IdTokenClaims>, AuthError> {
        Ok(self
            .inner
            .cache
            .get_user(&self.inner.options.client_id)
            .await?
            .map(|cached| cached.claims))
    }

    /// Whether a user is logged in.
    ///
    /// A cached user answers directly. Otherwise the session hint only
    /// decides whether a silent renewal is worth trying; a hint whose
    /// renewal fails resolves to `false`.
    pub async fn is_connected(&self) -> Result<bool, AuthError> {
        if self.get_user().await?.is_some() {
            return Ok(true);
        }
        if !self.inner.hints.is_authenticated() {
            return Ok(false);
        }
        if let Err(err) = self.get_token_silently(GetTokenSilentlyOptions::default()).await {
            warn!(error = %err, category = %err.category(), "hinted session could not be renewed");
            return Ok(false);
        }
        Ok(self.get_user().await?.is_some())
    }

    /// Renew silently if a previous login is hinted, ignoring answers that
    /// only mean "log in again".
    pub async fn check_session(&self) -> Result<(), AuthError> {
        if !self.inner.hints.is_authenticated() {
            debug!("no session hint; skipping silent renewal");
            return Ok(());
        }
        match self.get_token_silently(GetTokenSilentlyOptions::default()).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_recoverable() => {
                warn!(error = %err, "silent session check needs user interaction");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Clear local state, then leave through the end-session endpoint.
    pub async fn logout(&self, options: LogoutOptions) -> Result<(), AuthError> {
        let inner = &self.inner;
        LogoutCoordinator {
            options: &inner.options,
            cache: &inner.cache,
            hints: &inner.hints,
            navigator: inner.navigator.as_deref(),
        }
        .logout(options)
        .await
    }

    pub fn build_logout_url(
        &self,
        return_to: Option<&str>,
        federated: bool,
    ) -> Result<String, AuthError> {
        build_logout_url(
            &self.inner.options,
            Some(&self.inner.options.client_id),
            return_to,
            federated,
        )
    }
}

fn fingerprint(options: &ClientOptions, params: &AuthorizationParams) -> CacheKey {
    let builder = AuthorizationRequestBuilder::new(options);
    CacheKey::new(
        &options.client_id,
        &builder.audience_for(params),
        &builder.scope_for(params),
    )
    .with_params(&params.custom_params())
}

fn transaction_key(options: &ClientOptions, transaction: &PkceTransaction) -> CacheKey {
    CacheKey::new(&options.client_id, &transaction.audience, &transaction.scope)
        .with_params(&transaction.custom_params)
}

impl Inner {
    /// One renewal under the cross-tab lock. Runs inside the single-flight
    /// slot for `key`.
    async fn renew(
        &self,
        key: CacheKey,
        params: AuthorizationParams,
        timeout: Duration,
        cache_mode: CacheMode,
    ) -> Result<TokenResponse, AuthError> {
        let _guard = match &self.tab_lock {
            Some(lock) => Some(
                acquire_with_retry(
                    lock.as_ref(),
                    GET_TOKEN_SILENTLY_LOCK,
                    LOCK_ACQUIRE_TIMEOUT,
                    &RetryPolicy::lock_acquisition(),
                )
                .await?,
            ),
            None => None,
        };

        // Another tab may have renewed while we waited for the lock.
        if cache_mode != CacheMode::Off {
            if let Some(entry) = self.cache.get(&key).await? {
                return Ok(TokenResponse::from_entry(&entry, (self.clock)()));
            }
        }

        let set = if self.options.use_refresh_tokens {
            match self.refresh(&key, &params).await {
                Ok(set) => set,
                Err(err) if falls_back_to_frame(&err) => {
                    debug!(error = %err, "refresh grant unavailable; using hidden frame");
                    self.silent_authorize(&params, timeout).await?
                }
                Err(err) => return Err(err),
            }
        } else {
            self.silent_authorize(&params, timeout).await?
        };

        self.store(&key, &set, params.organization.as_deref()).await?;
        Ok(TokenResponse::from_set(&set))
    }

    async fn refresh(
        &self,
        key: &CacheKey,
        params: &AuthorizationParams,
    ) -> Result<TokenSet, AuthError> {
        let refresh_token = self
            .cache
            .get_refresh_token(key)
            .await?
            .ok_or(AuthError::MissingRefreshToken)?;
        let redirect_uri = params
            .redirect_uri
            .as_deref()
            .or(self.options.redirect_uri.as_deref());
        let grant = RefreshGrant {
            refresh_token: refresh_token.clone(),
            redirect_uri: redirect_uri.map(ToString::to_string),
        };
        let mut set = self.exchanger().refresh(grant).await?;
        if set.refresh_token.is_none() {
            set.refresh_token = Some(refresh_token);
        }
        Ok(set)
    }

    /// Authorization-code round trip through the hidden frame.
    async fn silent_authorize(
        &self,
        params: &AuthorizationParams,
        timeout: Duration,
    ) -> Result<TokenSet, AuthError> {
        let frame = self.silent_frame.clone().ok_or_else(AuthError::login_required)?;
        let mut params = params.clone().with_prompt("none");
        if params.organization.is_none() {
            params.organization = self.hints.organization_hint();
        }
        let request = AuthorizationRequestBuilder::new(&self.options)
            .with_clock(self.clock.clone())
            .build(
                &params,
                ResponseMode::WebMessage,
                None,
            )?;
        let transaction = request.transaction;

        let mut flow = AuthorizationFlow::new(Transport::Silent);
        flow.request_sent()?;
        let response = flow.check(run_silent(frame.as_ref(), &request.url, timeout).await)?;
        flow.callback_received()?;
        let code = flow.check(response.into_code(&transaction.state))?;
        flow.exchanging()?;
        let set = flow.check(self.exchange_code(&transaction, code).await)?;
        flow.complete()?;
        Ok(set)
    }

    async fn exchange_code(
        &self,
        transaction: &PkceTransaction,
        code: String,
    ) -> Result<TokenSet, AuthError> {
        let grant = CodeGrant {
            code,
            code_verifier: transaction.code_verifier.clone(),
            redirect_uri: transaction.redirect_uri.clone(),
            nonce: transaction.nonce.clone(),
            access_id: transaction.access_id.clone(),
            max_age: transaction.max_age,
            organization: transaction.organization.clone(),
        };
        self.exchanger().exchange(grant).await
    }

    /// The worker when one is running, the in-line channel otherwise.
    fn exchanger(&self) -> &dyn CodeExchange {
        match &self.worker {
            Some(worker) => worker,
            None => self.channel.as_ref(),
        }
    }

    /// Persist a verified token set: cache entry, user, then the hint.
    async fn store(
        &self,
        key: &CacheKey,
        set: &TokenSet,
        organization: Option<&str>,
    ) -> Result<(), AuthError> {
        let now = (self.clock)();
        let entry =
            CachedTokenEntry::from_token_set(key, set, self.options.use_refresh_tokens, now);
        self.cache.set(key, entry).await?;
        self.cache
            .set_user(
                &self.options.client_id,
                CachedUser {
                    id_token: set.id_token.clone(),
                    claims: set.claims.clone(),
                },
            )
            .await?;
        self.hints
            .mark_authenticated(set.claims.org_id.as_deref().or(organization));
        Ok(())
    }
}

fn falls_back_to_frame(err: &AuthError) -> bool {
    matches!(err, AuthError::MissingRefreshToken) || err.oauth_code() == Some("invalid_grant")
}
