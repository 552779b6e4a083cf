//! Utility modules: retry, timeout, clock.

pub mod retry;
pub mod timeout;

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Injectable wall clock. Expiry math goes through this so tests can pin time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// A clock that always reports `at`.
pub fn fixed_clock(at: DateTime<Utc>) -> Clock {
    Arc::new(move || at)
}
