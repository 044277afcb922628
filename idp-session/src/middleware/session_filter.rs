//! Cookie-based session resolution for inbound requests
//!
//! The filter is transport agnostic: callers hand it the raw `Cookie` header
//! and the client address, and write back the `Set-Cookie` values it builds.

use crate::session::{Session, SessionCookieCodec, SessionError, SessionManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Session cookie settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Cookie name
    pub name: String,

    /// Cookie path attribute
    pub path: String,

    /// Add the `Secure` attribute
    pub secure: bool,

    /// Add the `HttpOnly` attribute
    pub http_only: bool,

    /// Reject cookies presented from an address other than the one they were issued to
    pub consistent_address: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "_idp_session".to_string(),
            path: "/idp".to_string(),
            secure: true,
            http_only: true,
            consistent_address: true,
        }
    }
}

impl CookieConfig {
    /// Reject cookie names and paths a browser would not honour
    pub fn validate(&self) -> Result<(), SessionError> {
        let name_ok = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?={}".contains(c));
        if !name_ok {
            return Err(SessionError::Configuration(format!(
                "invalid session cookie name '{}'",
                self.name
            )));
        }
        if !self.path.starts_with('/') {
            return Err(SessionError::Configuration(format!(
                "session cookie path '{}' must start with '/'",
                self.path
            )));
        }
        Ok(())
    }
}

/// Session state attached to one request
#[derive(Debug, Clone)]
pub struct SessionRequestContext {
    /// Client address the request arrived from
    pub remote_address: String,

    /// Resolved session, if a valid cookie was presented
    pub session: Option<Arc<Session>>,

    /// A session cookie was present, valid or not
    pub cookie_presented: bool,
}

impl SessionRequestContext {
    /// Context for a request from `remote_address`, no session resolved yet
    pub fn new(remote_address: impl Into<String>) -> Self {
        Self {
            remote_address: remote_address.into(),
            session: None,
            cookie_presented: false,
        }
    }

    /// Attach the resolved session
    pub fn with_session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Whether a session was resolved
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Primary ID of the resolved session
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_deref().map(Session::session_id)
    }

    /// A cookie was sent but did not resolve; the browser should drop it
    pub fn should_clear_cookie(&self) -> bool {
        self.cookie_presented && self.session.is_none()
    }
}

/// Resolves the IdP session cookie on each request
pub struct SessionFilter {
    codec: SessionCookieCodec,
    config: CookieConfig,
}

impl SessionFilter {
    /// Filter over `session_manager`; fails if `config` is invalid
    pub fn new(
        session_manager: Arc<SessionManager>,
        config: CookieConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            codec: SessionCookieCodec::new(session_manager, config.consistent_address),
            config,
        })
    }

    /// Cookie settings in effect
    pub fn config(&self) -> &CookieConfig {
        &self.config
    }

    /// Codec reading and writing the session cookie
    pub fn codec(&self) -> &SessionCookieCodec {
        &self.codec
    }

    /// Manager owning the sessions
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        self.codec.session_manager()
    }

    /// Values of every session cookie in a `Cookie` header, in order
    pub fn cookie_values<'a>(&self, cookie_header: &'a str) -> Vec<&'a str> {
        cookie_header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                (name.trim() == self.config.name).then(|| value.trim().trim_matches('"'))
            })
            .collect()
    }

    /// Resolve the request's session from its `Cookie` header
    ///
    /// Browsers may send several cookies with the same name (differing
    /// paths or domains); the first one that validates wins.
    pub async fn process_request(
        &self,
        cookie_header: Option<&str>,
        remote_address: &str,
    ) -> Result<SessionRequestContext, SessionError> {
        let mut context = SessionRequestContext::new(remote_address);

        let Some(header) = cookie_header else {
            return Ok(context);
        };

        for value in self.cookie_values(header) {
            context.cookie_presented = true;
            if let Some(session) = self.codec.decode(value, remote_address).await? {
                debug!("Request from {} bound to session {}", remote_address, session.session_id());
                return Ok(context.with_session(session));
            }
        }

        Ok(context)
    }

    /// `Set-Cookie` value carrying `session` to the browser
    pub fn set_cookie_header(&self, session: &Session, remote_address: &str) -> String {
        let value = self.codec.encode(session, remote_address);
        format!("{}={}{}", self.config.name, value, self.attributes())
    }

    /// `Set-Cookie` value instructing the browser to discard the cookie
    pub fn clear_cookie_header(&self) -> String {
        format!(
            "{}=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT{}",
            self.config.name,
            self.attributes()
        )
    }

    fn attributes(&self) -> String {
        let mut attributes = format!("; Path={}", self.config.path);
        if self.config.secure {
            attributes.push_str("; Secure");
        }
        if self.config.http_only {
            attributes.push_str("; HttpOnly");
        }
        attributes
    }
}
