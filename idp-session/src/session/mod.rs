//! Session Management Module
//!
//! Browser sessions for the IdP: the session record, its stored index entry,
//! the manager owning their lifecycle and the cookie codec that carries a
//! session reference to the browser.

pub mod cookie;
pub mod entry;
pub mod record;
pub mod session_manager;

pub use cookie::{CookieRejection, DecodedCookie, SessionCookieCodec, COOKIE_DELIMITER};
pub use entry::SessionIndexEntry;
pub use record::{AuthenticationMethodInformation, ServiceInformation, Session};
pub use session_manager::{
    DestroyReason, SessionConfig, SessionError, SessionEvent, SessionManager,
};
