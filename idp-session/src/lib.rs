//! # SAML IdP Session Core
//!
//! Browser session management and artifact mapping for a SAML Identity
//! Provider.
//!
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::new_without_default)]
//! ## Quick Start
//!
//! ### Sessions and cookies
//!
//! ```rust,ignore
//! use saml_idp_session::{MemoryStorageService, SessionConfig, SessionFilter, SessionManager};
//! use std::sync::Arc;
//!
//! let manager = Arc::new(SessionManager::new(
//!     SessionConfig::default(),
//!     Arc::new(MemoryStorageService::new()),
//! )?);
//!
//! let session = manager.create_session().await?;
//! session.set_principal_name("jdoe");
//! manager.save_session(&session).await?;
//!
//! let filter = SessionFilter::new(manager.clone(), Default::default())?;
//! let set_cookie = filter.set_cookie_header(&session, "192.0.2.10");
//!
//! // On the next request
//! let context = filter.process_request(Some(cookie_header), "192.0.2.10").await?;
//! ```
//!
//! ### Artifacts
//!
//! ```rust,ignore
//! use saml_idp_session::{ArtifactConfig, ArtifactMapper, MemoryStorageService, RelyingParty};
//!
//! let mapper = ArtifactMapper::new(
//!     ArtifactConfig::new("https://idp.example.org/idp/shibboleth"),
//!     Arc::new(MemoryStorageService::new()),
//! )?;
//!
//! let artifact = mapper
//!     .generate_artifact(assertion_xml, &RelyingParty::new("https://sp.example.org"))
//!     .await?;
//!
//! // Back channel resolution; works exactly once
//! if let Some(mapping) = mapper.recover_assertion(&artifact).await? {
//!     if mapping.is_correct_provider(requester) {
//!         respond_with(mapping.into_assertion());
//!     }
//! }
//! ```
//!
//! ## Storage
//!
//! Everything persistent goes through [`StorageService`]. The bundled
//! [`MemoryStorageService`] suits single-node deployments; clustered
//! deployments provide a shared store offering the same atomic
//! `put_if_absent`, `replace_if` and `remove_if` primitives. Stored values
//! are serde-serializable and travel through the store by value.
//!
//! ## Expiration
//!
//! Sessions expire lazily: an expired session is destroyed the moment a
//! lookup finds it. A periodic sweep can be enabled with
//! `SessionConfig::cleanup_interval_secs` to reclaim abandoned sessions.

pub mod artifact;
pub mod config;
pub mod crypto;
pub mod logging;
pub mod middleware;
pub mod session;
pub mod storage;

pub use artifact::{
    Artifact, ArtifactConfig, ArtifactDecodeError, ArtifactError, ArtifactMapper,
    ArtifactMapping, RelyingParty,
};
pub use config::{ConfigError, IdpSessionConfig};
pub use crypto::{CryptoError, OsRandomSource, RandomSource};
pub use logging::{LogFormat, LoggingConfig, LoggingError};
pub use middleware::{CookieConfig, SessionFilter, SessionRequestContext};
pub use session::{
    AuthenticationMethodInformation, CookieRejection, DestroyReason, ServiceInformation, Session,
    SessionConfig, SessionCookieCodec, SessionError, SessionEvent, SessionIndexEntry,
    SessionManager,
};
pub use storage::{ExpiringObject, MemoryStorageService, StorageError, StorageService};
