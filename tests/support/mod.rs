#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use eartho_one::cache::InMemoryCache;
use eartho_one::context::BrowserContext;
use eartho_one::error::AuthError;
use eartho_one::flow::{CallbackParams, CallbackReply, Navigator, Popup, PopupHandle, SilentFrame};
use eartho_one::session::MemoryCookieJar;
use eartho_one::token::StaticKeySource;
use eartho_one::util::Clock;
use eartho_one::{ClientOptions, EarthoOne};
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::Url;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const CLIENT_ID: &str = "client-1";
pub const ISSUER: &str = "https://one.eartho.world/";
pub const REDIRECT_URI: &str = "https://app.example.com/callback";
pub const SECRET: &[u8] = b"integration-test-signing-secret";
pub const TOKEN_PATH: &str = "/access/oauth/token";
pub const REFRESH_PATH: &str = "/access/oauth/refreshtoken";
pub const EXPIRES_IN: i64 = 3600;

/// Last nonce seen in an authorize URL, echoed into minted ID tokens.
pub type NonceSlot = Arc<Mutex<Option<String>>>;

/// Test clock that only moves when told to.
#[derive(Clone)]
pub struct TestClock {
    offset: Arc<AtomicI64>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            offset: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        start + chrono::Duration::seconds(self.offset.load(Ordering::SeqCst))
    }

    pub fn advance(&self, secs: i64) {
        self.offset.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn clock(&self) -> Clock {
        let this = self.clone();
        Arc::new(move || this.now())
    }
}

pub fn mint_id_token(now: DateTime<Utc>, nonce: Option<&str>) -> String {
    let mut claims = json!({
        "iss": ISSUER,
        "sub": "user-1",
        "aud": CLIENT_ID,
        "iat": now.timestamp(),
        "exp": now.timestamp() + EXPIRES_IN,
        "email": "user@example.com",
        "name": "Test User",
    });
    if let Some(nonce) = nonce {
        claims["nonce"] = json!(nonce);
    }
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

pub fn query(url: &str) -> HashMap<String, String> {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Token endpoint that mints a fresh, correctly signed response per call.
pub struct TokenResponder {
    clock: TestClock,
    nonce: NonceSlot,
    prefix: &'static str,
    issued: AtomicUsize,
}

impl TokenResponder {
    pub fn new(clock: TestClock, nonce: NonceSlot, prefix: &'static str) -> Self {
        Self {
            clock,
            nonce,
            prefix,
            issued: AtomicUsize::new(0),
        }
    }
}

impl Respond for TokenResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let nonce = self.nonce.lock().unwrap().clone();
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": format!("{}-at-{n}", self.prefix),
            "id_token": mint_id_token(self.clock.now(), nonce.as_deref()),
            "refresh_token": format!("{}-rt-{n}", self.prefix),
            "expires_in": EXPIRES_IN,
            "token_type": "Bearer",
        }))
    }
}

#[derive(Default)]
pub struct Transports {
    pub navigator: Option<Arc<dyn Navigator>>,
    pub popup: Option<Arc<dyn Popup>>,
    pub silent_frame: Option<Arc<dyn SilentFrame>>,
}

/// Mock provider plus the shared state one "browser" would have.
pub struct Harness {
    pub server: MockServer,
    pub clock: TestClock,
    pub nonce: NonceSlot,
    pub jar: Arc<MemoryCookieJar>,
    pub cache: Arc<InMemoryCache>,
}

impl Harness {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            clock: TestClock::new(),
            nonce: Arc::new(Mutex::new(None)),
            jar: Arc::new(MemoryCookieJar::new()),
            cache: Arc::new(InMemoryCache::new()),
        }
    }

    pub fn options(&self) -> ClientOptions {
        ClientOptions::builder()
            .client_id(CLIENT_ID)
            .redirect_uri(REDIRECT_URI)
            .token_endpoint(format!("{}{TOKEN_PATH}", self.server.uri()))
            .refresh_endpoint(format!("{}{REFRESH_PATH}", self.server.uri()))
            .build()
    }

    pub fn context(&self) -> BrowserContext {
        BrowserContext::new().with_cookie_jar(self.jar.clone())
    }

    pub fn engine(&self, options: ClientOptions) -> EarthoOne {
        self.engine_with(options, self.context(), Transports::default())
    }

    pub fn engine_with(
        &self,
        options: ClientOptions,
        context: BrowserContext,
        transports: Transports,
    ) -> EarthoOne {
        EarthoOne::builder()
            .options(options)
            .context(context)
            .cache(self.cache.clone())
            .key_source(Arc::new(StaticKeySource::hmac(SECRET)))
            .clock(self.clock.clock())
            .maybe_navigator(transports.navigator)
            .maybe_popup(transports.popup)
            .maybe_silent_frame(transports.silent_frame)
            .build()
            .unwrap()
    }

    pub async fn mount_token_endpoint(&self, expected: u64) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(TokenResponder::new(
                self.clock.clone(),
                self.nonce.clone(),
                "code",
            ))
            .expect(expected)
            .mount(&self.server)
            .await;
    }

    pub async fn mount_refresh_endpoint(&self, expected: u64) {
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(TokenResponder::new(
                self.clock.clone(),
                self.nonce.clone(),
                "refreshed",
            ))
            .expect(expected)
            .mount(&self.server)
            .await;
    }

    /// Complete a redirect login against the mounted token endpoint.
    pub async fn login(&self, engine: &EarthoOne) {
        let url = engine.build_authorize_url(Default::default()).unwrap();
        let params = query(&url);
        *self.nonce.lock().unwrap() = params.get("nonce").cloned();
        let callback = format!("{REDIRECT_URI}?code=code-1&state={}", params["state"]);
        engine.handle_redirect_callback(&callback).await.unwrap();
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    urls: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn assign(&self, url: &str) {
        self.urls.lock().unwrap().push(url.to_string());
    }
}

/// What a fake transport does with the authorize request.
#[derive(Debug, Clone)]
pub enum Answer {
    /// Post a code with the request's state.
    Code,
    /// Post a provider error with the request's state.
    Error(&'static str),
    /// Post a code with the wrong state.
    WrongState,
    /// Never answer.
    Hang,
    /// Answer with a code after a delay.
    After(Duration),
}

/// Carry out `answer`; returns the reply when it must be kept open.
fn answer(
    answer: &Answer,
    url: &str,
    reply: CallbackReply,
    delivered: Arc<AtomicUsize>,
) -> Option<CallbackReply> {
    let state = query(url).get("state").cloned();
    let code = CallbackParams {
        code: Some("code-1".to_string()),
        state: state.clone(),
        ..CallbackParams::default()
    };
    match answer {
        Answer::Code => {
            if reply.resolve(code) {
                delivered.fetch_add(1, Ordering::SeqCst);
            }
            None
        }
        Answer::Error(error) => {
            reply.resolve(CallbackParams {
                error: Some(error.to_string()),
                state,
                ..CallbackParams::default()
            });
            None
        }
        Answer::WrongState => {
            reply.resolve(CallbackParams {
                state: Some("not-the-state".to_string()),
                ..code
            });
            None
        }
        Answer::Hang => Some(reply),
        Answer::After(delay) => {
            let delay = *delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if reply.resolve(code) {
                    delivered.fetch_add(1, Ordering::SeqCst);
                }
            });
            None
        }
    }
}

/// Hidden frame that answers the way it is told to.
pub struct FakeFrame {
    answer: Answer,
    nonce: NonceSlot,
    loads: Mutex<Vec<String>>,
    parked: Mutex<Vec<CallbackReply>>,
    pub delivered: Arc<AtomicUsize>,
}

impl FakeFrame {
    pub fn new(answer: Answer, nonce: NonceSlot) -> Self {
        Self {
            answer,
            nonce,
            loads: Mutex::new(Vec::new()),
            parked: Mutex::new(Vec::new()),
            delivered: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn loads(&self) -> Vec<String> {
        self.loads.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

impl SilentFrame for FakeFrame {
    fn load(&self, url: &str, reply: CallbackReply) -> Result<(), AuthError> {
        *self.nonce.lock().unwrap() = query(url).get("nonce").cloned();
        self.loads.lock().unwrap().push(url.to_string());
        if let Some(parked) = answer(&self.answer, url, reply, self.delivered.clone()) {
            self.parked.lock().unwrap().push(parked);
        }
        Ok(())
    }
}

pub struct FakeWindow {
    closed: Arc<AtomicBool>,
    _reply: Option<CallbackReply>,
}

impl PopupHandle for FakeWindow {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub enum PopupBehavior {
    Answer(Answer),
    /// The user closes the window without answering.
    ClosedByUser,
    Blocked,
}

/// Popup opener with a scripted window.
pub struct FakePopup {
    behavior: PopupBehavior,
    nonce: NonceSlot,
    opened: Mutex<Vec<String>>,
    closed: Arc<AtomicBool>,
}

impl FakePopup {
    pub fn new(behavior: PopupBehavior, nonce: NonceSlot) -> Self {
        Self {
            behavior,
            nonce,
            opened: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn window_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Popup for FakePopup {
    fn open(&self, url: &str, reply: CallbackReply) -> Result<Box<dyn PopupHandle>, AuthError> {
        *self.nonce.lock().unwrap() = query(url).get("nonce").cloned();
        self.opened.lock().unwrap().push(url.to_string());
        let parked = match &self.behavior {
            PopupBehavior::Blocked => return Err(AuthError::PopupBlocked),
            PopupBehavior::ClosedByUser => {
                self.closed.store(true, Ordering::SeqCst);
                Some(reply)
            }
            PopupBehavior::Answer(scripted) => {
                answer(scripted, url, reply, Arc::new(AtomicUsize::new(0)))
            }
        };
        Ok(Box::new(FakeWindow {
            closed: self.closed.clone(),
            _reply: parked,
        }))
    }
}
