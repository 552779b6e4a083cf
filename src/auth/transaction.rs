//! Per-tab storage for the pending [`PkceTransaction`].

use std::collections::HashMap;
use std::sync::Mutex;

use super::authorize::PkceTransaction;
use crate::session::cookies::{CookieSaveOptions, CookieStorage};

const TRANSACTION_COOKIE_PREFIX: &str = "earthoOne.txs";

/// Where the pending transaction is kept.
pub enum TransactionStorage {
    /// Tab-scoped, dropped with the engine (session storage).
    Session(Mutex<HashMap<String, PkceTransaction>>),
    /// Cookie-backed, for flows that cross a full page load on another origin.
    Cookie {
        storage: CookieStorage,
        cookie_domain: Option<String>,
    },
}

impl TransactionStorage {
    pub fn session() -> Self {
        Self::Session(Mutex::new(HashMap::new()))
    }
}

/// Holds at most one redirect transaction per client id.
///
/// [`take`](Self::take) is the only read used by the callback path, so a
/// transaction is consumed exactly once.
pub struct TransactionManager {
    key: String,
    storage: TransactionStorage,
}

impl TransactionManager {
    pub fn new(client_id: &str, storage: TransactionStorage) -> Self {
        Self {
            key: format!("{TRANSACTION_COOKIE_PREFIX}.{client_id}"),
            storage,
        }
    }

    pub fn create(&self, transaction: PkceTransaction) {
        match &self.storage {
            TransactionStorage::Session(map) => {
                if let Ok(mut map) = map.lock() {
                    map.insert(self.key.clone(), transaction);
                }
            }
            TransactionStorage::Cookie {
                storage,
                cookie_domain,
            } => storage.save(
                &self.key,
                &transaction,
                &CookieSaveOptions {
                    days_until_expire: Some(1),
                    cookie_domain: cookie_domain.clone(),
                },
            ),
        }
    }

    pub fn get(&self) -> Option<PkceTransaction> {
        match &self.storage {
            TransactionStorage::Session(map) => map.lock().ok()?.get(&self.key).cloned(),
            TransactionStorage::Cookie { storage, .. } => storage.get(&self.key),
        }
    }

    /// Remove and return the pending transaction.
    pub fn take(&self) -> Option<PkceTransaction> {
        match &self.storage {
            TransactionStorage::Session(map) => map.lock().ok()?.remove(&self.key),
            TransactionStorage::Cookie {
                storage,
                cookie_domain,
            } => {
                let transaction = storage.get(&self.key);
                storage.remove(&self.key, cookie_domain.as_deref());
                transaction
            }
        }
    }
}
