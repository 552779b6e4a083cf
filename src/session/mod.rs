//! Session hint cookies and logout.

pub mod cookies;
pub mod hints;
pub mod logout;

pub use cookies::{CookieJar, CookieStorage, MemoryCookieJar};
pub use hints::SessionHintStore;
pub use logout::{build_logout_url, LogoutCoordinator, LogoutOptions, LogoutTarget, OpenUrl};
