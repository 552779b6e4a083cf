//! Scope normalization.

use std::collections::BTreeSet;

pub const OPENID_SCOPE: &str = "openid";
pub const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

/// Merge scope strings into one space-separated, de-duplicated string.
///
/// Order is first-seen across all inputs; `None` and blank inputs are skipped.
pub fn unique_scopes<'a>(scopes: impl IntoIterator<Item = Option<&'a str>>) -> String {
    let mut seen = BTreeSet::new();
    let mut out: Vec<&str> = Vec::new();
    for scope in scopes.into_iter().flatten() {
        for part in scope.split_whitespace() {
            if seen.insert(part) {
                out.push(part);
            }
        }
    }
    out.join(" ")
}

/// Normalize a default scope and a requested scope into the request scope.
///
/// `openid` is always present (first, unless the inputs already place it),
/// and `offline_access` is appended when refresh tokens are in use.
///
/// # Example
/// ```
/// use eartho_one::auth::scope::normalize;
///
/// assert_eq!(normalize(Some("openid profile email"), None, false), "openid profile email");
/// assert_eq!(
///     normalize(Some("openid profile"), Some("test-scope"), true),
///     "openid profile test-scope offline_access"
/// );
/// ```
pub fn normalize(
    default_scope: Option<&str>,
    requested: Option<&str>,
    offline_access: bool,
) -> String {
    let merged = unique_scopes([Some(OPENID_SCOPE), default_scope, requested]);
    if offline_access {
        unique_scopes([Some(merged.as_str()), Some(OFFLINE_ACCESS_SCOPE)])
    } else {
        merged
    }
}

/// Scope as a sorted set, for order-insensitive comparison.
pub fn scope_set(scope: &str) -> BTreeSet<&str> {
    scope.split_whitespace().collect()
}
