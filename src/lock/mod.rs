//! Refresh locking.
//!
//! Two layers: [`SingleFlight`] coalesces concurrent callers inside one
//! engine so they share one outcome, and [`CrossTabLock`] serializes
//! renewals between engines that share a lock provider.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::error::AuthError;
use crate::util::retry::RetryPolicy;

/// Lock name shared by every engine for silent renewal.
pub const GET_TOKEN_SILENTLY_LOCK: &str = "earthoOne.lock.getTokenSilently";

/// Budget for one acquisition attempt.
pub const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, AuthError>>>;

/// At most one in-flight computation per name; late callers join it.
///
/// The computation is spawned, so it runs to completion even if every
/// waiter goes away. Its entry is removed when it finishes, success or
/// failure, and the next call starts a fresh attempt.
pub struct SingleFlight<T> {
    inflight: Arc<Mutex<HashMap<String, SharedOutcome<T>>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, Fut>(&self, name: &str, operation: F) -> Result<T, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AuthError>> + Send + 'static,
    {
        let outcome = {
            let mut inflight = self
                .inflight
                .lock()
                .map_err(|_| AuthError::Internal("single-flight map poisoned".to_string()))?;
            match inflight.get(name) {
                Some(existing) => {
                    debug!(lock = name, "joining in-flight renewal");
                    existing.clone()
                }
                None => {
                    let registry = Arc::clone(&self.inflight);
                    let key = name.to_string();
                    let work = operation();
                    let handle = tokio::spawn(async move {
                        let result = work.await;
                        if let Ok(mut inflight) = registry.lock() {
                            inflight.remove(&key);
                        }
                        result
                    });
                    let outcome = async move {
                        handle.await.unwrap_or_else(|err| {
                            Err(AuthError::Internal(format!("renewal task failed: {err}")))
                        })
                    }
                    .boxed()
                    .shared();
                    inflight.insert(name.to_string(), outcome.clone());
                    outcome
                }
            }
        };
        outcome.await
    }

    /// Number of names with work in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().map(|map| map.len()).unwrap_or(0)
    }
}

/// Held for as long as the lock is owned.
pub struct LockGuard {
    _held: Box<dyn Send + Sync>,
}

impl LockGuard {
    pub fn new(held: impl Send + Sync + 'static) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

/// A named lock shared between engine instances (the platform's
/// cross-tab lock).
#[async_trait]
pub trait CrossTabLock: Send + Sync {
    /// Acquire `name` within `timeout`, or fail with [`AuthError::LockTimeout`].
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<LockGuard, AuthError>;
}

/// Named async mutexes shared by every engine holding this value.
#[derive(Default)]
pub struct InProcessLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InProcessLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CrossTabLock for InProcessLocks {
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<LockGuard, AuthError> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| AuthError::Internal("lock registry poisoned".to_string()))?;
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => {
                debug!(lock = name, "acquired cross-tab lock");
                Ok(LockGuard::new(guard))
            }
            Err(_) => Err(AuthError::LockTimeout(name.to_string())),
        }
    }
}

/// Acquire `name` with the per-attempt budget, retrying on contention.
pub async fn acquire_with_retry(
    lock: &dyn CrossTabLock,
    name: &str,
    timeout: Duration,
    policy: &RetryPolicy,
) -> Result<LockGuard, AuthError> {
    policy.execute(|| lock.acquire(name, timeout)).await
}
