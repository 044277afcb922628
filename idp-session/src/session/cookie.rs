//! Tamper-evident session cookie encoding
//!
//! Cookie value layout, URL encoded as a whole:
//!
//! ```text
//! base64(remote address) | base64(session id) | base64(HMAC-SHA1(secret, remote address || session id))
//! ```
//!
//! Every validation failure resolves to "no session". Only storage failures
//! surface as errors.

use crate::crypto::{hmac_sha1, verify_hmac_sha1};
use crate::session::{Session, SessionError, SessionManager};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Separator between the three cookie fields
pub const COOKIE_DELIMITER: char = '|';

/// Why a cookie was not accepted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CookieRejection {
    /// Percent-decoding failed
    #[error("cookie is not URL encoded correctly")]
    InvalidUrlEncoding,

    /// The value does not split into three fields
    #[error("cookie has {0} fields, expected 3")]
    WrongFieldCount(usize),

    /// A field is not base64
    #[error("cookie field {0} is not valid base64")]
    InvalidBase64(&'static str),

    /// A decoded field is not UTF-8
    #[error("cookie field {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// The session ID does not resolve to a live session
    #[error("no live session for cookie")]
    UnknownSession,

    /// Presented from another client address
    #[error("cookie issued to {cookie_address}, presented from {request_address}")]
    AddressMismatch {
        /// Address the cookie was issued to
        cookie_address: String,
        /// Address the request came from
        request_address: String,
    },

    /// The signature does not verify against the session secret
    #[error("cookie signature does not match")]
    SignatureMismatch,
}

impl CookieRejection {
    /// Rejections that point at tampering rather than a stale or garbled cookie
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            CookieRejection::AddressMismatch { .. } | CookieRejection::SignatureMismatch
        )
    }
}

/// Structural content of a cookie value, before any verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCookie {
    /// Client address the cookie was issued to
    pub remote_address: String,
    /// Primary ID of the session
    pub session_id: String,
    /// Raw signature bytes
    pub signature: Vec<u8>,
}

impl DecodedCookie {
    /// Split and base64-decode a raw (URL encoded) cookie value
    pub fn parse(cookie_value: &str) -> Result<Self, CookieRejection> {
        let decoded =
            urlencoding::decode(cookie_value).map_err(|_| CookieRejection::InvalidUrlEncoding)?;

        let fields: Vec<&str> = decoded.split(COOKIE_DELIMITER).collect();
        if fields.len() != 3 {
            return Err(CookieRejection::WrongFieldCount(fields.len()));
        }

        let remote_address = decode_text(fields[0], "remote address")?;
        let session_id = decode_text(fields[1], "session id")?;
        let signature = BASE64
            .decode(fields[2])
            .map_err(|_| CookieRejection::InvalidBase64("signature"))?;

        Ok(Self {
            remote_address,
            session_id,
            signature,
        })
    }
}

fn decode_text(field: &str, name: &'static str) -> Result<String, CookieRejection> {
    let bytes = BASE64
        .decode(field)
        .map_err(|_| CookieRejection::InvalidBase64(name))?;
    String::from_utf8(bytes).map_err(|_| CookieRejection::InvalidUtf8(name))
}

/// Builds and validates session cookie values
pub struct SessionCookieCodec {
    session_manager: Arc<SessionManager>,
    consistent_address: bool,
}

impl SessionCookieCodec {
    /// Codec over `session_manager`; `consistent_address` binds cookies to the client address
    pub fn new(session_manager: Arc<SessionManager>, consistent_address: bool) -> Self {
        Self {
            session_manager,
            consistent_address,
        }
    }

    /// Manager resolving cookie session IDs
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    /// Whether a cookie must come from the address it was issued to
    pub fn requires_consistent_address(&self) -> bool {
        self.consistent_address
    }

    /// Encode a cookie value binding `session` to the client's address
    pub fn encode(&self, session: &Session, remote_address: &str) -> String {
        let signature = hmac_sha1(
            session.secret(),
            &[remote_address.as_bytes(), session.session_id().as_bytes()],
        );

        let value = format!(
            "{}{delim}{}{delim}{}",
            BASE64.encode(remote_address.as_bytes()),
            BASE64.encode(session.session_id().as_bytes()),
            BASE64.encode(&signature),
            delim = COOKIE_DELIMITER,
        );

        urlencoding::encode(&value).into_owned()
    }

    /// Validate a cookie value and resolve its session
    ///
    /// Returns `Ok(None)` for any cookie that fails validation. On success the
    /// session's last activity is refreshed in the store.
    pub async fn decode(
        &self,
        cookie_value: &str,
        remote_address: &str,
    ) -> Result<Option<Arc<Session>>, SessionError> {
        match self.validate(cookie_value, remote_address).await? {
            Ok(session) => self.session_manager.touch_session(session.session_id()).await,
            Err(rejection) => {
                log_rejection(&rejection, remote_address);
                Ok(None)
            }
        }
    }

    /// Run every validation step, reporting why a cookie was rejected
    pub async fn validate(
        &self,
        cookie_value: &str,
        remote_address: &str,
    ) -> Result<Result<Arc<Session>, CookieRejection>, SessionError> {
        let cookie = match DecodedCookie::parse(cookie_value) {
            Ok(cookie) => cookie,
            Err(rejection) => return Ok(Err(rejection)),
        };

        let Some(session) = self.session_manager.peek_session(&cookie.session_id).await? else {
            return Ok(Err(CookieRejection::UnknownSession));
        };

        if self.consistent_address && cookie.remote_address.as_bytes() != remote_address.as_bytes()
        {
            return Ok(Err(CookieRejection::AddressMismatch {
                cookie_address: cookie.remote_address,
                request_address: remote_address.to_string(),
            }));
        }

        if !verify_hmac_sha1(
            session.secret(),
            &[cookie.remote_address.as_bytes(), cookie.session_id.as_bytes()],
            &cookie.signature,
        ) {
            return Ok(Err(CookieRejection::SignatureMismatch));
        }

        Ok(Ok(session))
    }
}

fn log_rejection(rejection: &CookieRejection, remote_address: &str) {
    match rejection {
        CookieRejection::AddressMismatch {
            cookie_address,
            request_address,
        } => {
            warn!(
                "Session cookie issued to {} was presented from {}; possible session riding attempt",
                cookie_address, request_address
            );
        }
        CookieRejection::SignatureMismatch => {
            error!(
                "Session cookie from {} failed signature verification; cookie has been tampered with",
                remote_address
            );
        }
        CookieRejection::UnknownSession => {
            debug!("Session cookie from {} refers to no live session", remote_address);
        }
        other => {
            debug!("Malformed session cookie from {}: {}", remote_address, other);
        }
    }
}
