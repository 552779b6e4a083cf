//! Full-page navigation seam.

/// Navigates the current tab away (`window.location.assign`).
///
/// The redirect transport ends here; the response arrives later through
/// `EarthoOne::handle_redirect_callback` on a fresh page load.
pub trait Navigator: Send + Sync {
    fn assign(&self, url: &str);
}
