//! Request-level session handling
//!
//! Glue between HTTP request handling and the session manager.

pub mod session_filter;

pub use session_filter::{CookieConfig, SessionFilter, SessionRequestContext};
