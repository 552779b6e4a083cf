//! Per-tab ambient state owned by an engine instance.

use std::sync::Arc;

use crate::lock::CrossTabLock;
use crate::session::cookies::{CookieJar, MemoryCookieJar};

/// Cookies, the optional shared lock provider, and the origin that scopes
/// the persistent cache.
///
/// Engines that should behave like tabs of one browser share the cookie jar
/// and lock provider; tests build a fresh context per case.
#[derive(Clone)]
pub struct BrowserContext {
    pub cookies: Arc<dyn CookieJar>,
    /// `None` when the platform has no cross-tab lock; renewals are then
    /// serialized inside this engine only.
    pub tab_lock: Option<Arc<dyn CrossTabLock>>,
    pub origin: Option<String>,
}

impl Default for BrowserContext {
    fn default() -> Self {
        Self {
            cookies: Arc::new(MemoryCookieJar::new()),
            tab_lock: None,
            origin: None,
        }
    }
}

impl BrowserContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie_jar(mut self, cookies: Arc<dyn CookieJar>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn with_cross_tab_lock(mut self, lock: Arc<dyn CrossTabLock>) -> Self {
        self.tab_lock = Some(lock);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}
