//! Session lifecycle management for the IdP
//!
//! Sessions are created with secure random identifiers, stored in a
//! partitioned [`StorageService`], resolved by their primary ID or by any
//! registered secondary index, and destroyed explicitly or lazily once their
//! inactivity timeout has passed.
//!
//! The partition holds one primary entry per session, carrying a snapshot of
//! the session and its index set, plus one pointer entry per secondary index.
//! Writes to a primary entry are conditional on the version that was read.

use crate::crypto::{self, CryptoError, OsRandomSource, RandomSource};
use crate::session::{Session, SessionIndexEntry};
use crate::storage::{ExpiringObject, MemoryStorageService, StorageError, StorageService};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Attempts at finding an unused session ID before giving up
const MAX_ID_ATTEMPTS: usize = 3;

/// Attempts at a conditional write of a session record before giving up
const MAX_UPDATE_ATTEMPTS: usize = 16;

/// Longest accepted inactivity timeout (ten years)
pub const MAX_INACTIVITY_TIMEOUT_MS: u64 = 10 * 365 * 24 * 60 * 60 * 1000;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors that can occur during session management
#[derive(Debug, Error)]
pub enum SessionError {
    /// The backing store failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The random source failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Invalid configuration, reported at construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No unused session ID could be generated
    #[error("Session creation failed: {reason}")]
    CreationFailed {
        /// What went wrong
        reason: String,
    },

    /// Concurrent writers kept replacing the session record first
    #[error("Session {session_id} is being updated concurrently")]
    UpdateConflict {
        /// Primary ID of the session
        session_id: String,
    },
}

/// Configuration for session management
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity timeout in milliseconds
    pub inactivity_timeout_ms: u64,

    /// Storage partition holding sessions and their indexes
    pub partition: String,

    /// Interval of the optional background sweep; `None` keeps expiration lazy
    pub cleanup_interval_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: 30 * 60 * 1000, // 30 minutes
            partition: "session".to_string(),
            cleanup_interval_secs: None,
        }
    }
}

impl SessionConfig {
    /// Inactivity timeout as a duration
    pub fn inactivity_timeout(&self) -> chrono::Duration {
        i64::try_from(self.inactivity_timeout_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Check the configuration, rejecting values no session could live with
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.inactivity_timeout_ms == 0 {
            return Err(SessionError::Configuration(
                "inactivity timeout must be greater than zero".to_string(),
            ));
        }
        if self.inactivity_timeout_ms > MAX_INACTIVITY_TIMEOUT_MS {
            return Err(SessionError::Configuration(format!(
                "inactivity timeout must not exceed {} ms",
                MAX_INACTIVITY_TIMEOUT_MS
            )));
        }
        if self.partition.trim().is_empty() {
            return Err(SessionError::Configuration(
                "session partition name must not be empty".to_string(),
            ));
        }
        if self.cleanup_interval_secs == Some(0) {
            return Err(SessionError::Configuration(
                "cleanup interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why a session was destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// `destroy_session` was called
    Explicit,
    /// The inactivity timeout passed
    Expired,
}

/// Session lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session was stored
    Created {
        /// Primary ID of the session
        session_id: String,
    },
    /// A secondary index now resolves to the session
    Indexed {
        /// Primary ID of the session
        session_id: String,
        /// The secondary index
        index: String,
    },
    /// A secondary index was removed
    IndexRemoved {
        /// Primary ID of the session
        session_id: String,
        /// The secondary index
        index: String,
    },
    /// The session and its indexes were removed
    Destroyed {
        /// Primary ID of the session
        session_id: String,
        /// Why it was destroyed
        reason: DestroyReason,
    },
}

/// Session manager for handling session lifecycle
///
/// Every state change is written back to the store, so several managers in
/// different processes can share one [`StorageService`]. Sessions handed out
/// are copies of the stored record.
pub struct SessionManager {
    config: SessionConfig,
    storage: Arc<dyn StorageService<SessionIndexEntry>>,
    random: Arc<dyn RandomSource>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Create a new session manager over the given store
    pub fn new(
        config: SessionConfig,
        storage: Arc<dyn StorageService<SessionIndexEntry>>,
    ) -> Result<Self, SessionError> {
        Self::with_random_source(config, storage, Arc::new(OsRandomSource))
    }

    /// Create a session manager drawing identifiers from `random`
    pub fn with_random_source(
        config: SessionConfig,
        storage: Arc<dyn StorageService<SessionIndexEntry>>,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        crypto::init(random.as_ref())?;
        Ok(Self::build(config, storage, random))
    }

    /// Create with default configuration and memory storage
    pub fn with_default_config() -> Self {
        Self::build(
            SessionConfig::default(),
            Arc::new(MemoryStorageService::new()),
            Arc::new(OsRandomSource),
        )
    }

    fn build(
        config: SessionConfig,
        storage: Arc<dyn StorageService<SessionIndexEntry>>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            storage,
            random,
            events,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribe to session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Create and store a new session
    pub async fn create_session(&self) -> Result<Arc<Session>, SessionError> {
        let partition = &self.config.partition;

        for _ in 0..MAX_ID_ATTEMPTS {
            let session_id = crypto::generate_session_id(self.random.as_ref())?;
            let secret = crypto::generate_session_secret(self.random.as_ref())?;
            let session = Session::new(session_id, secret, self.config.inactivity_timeout());
            let entry = SessionIndexEntry::primary(session.clone());

            match self
                .storage
                .put_if_absent(partition, session.session_id(), entry)
                .await?
            {
                None => {
                    info!(
                        "Created session {} (inactivity timeout: {} ms)",
                        session.session_id(),
                        self.config.inactivity_timeout_ms
                    );
                    self.emit(SessionEvent::Created {
                        session_id: session.session_id().to_string(),
                    });
                    return Ok(Arc::new(session));
                }
                Some(_) => {
                    warn!("Generated session ID already in use, regenerating");
                }
            }
        }

        Err(SessionError::CreationFailed {
            reason: "could not generate an unused session ID".to_string(),
        })
    }

    /// Resolve a session by its ID or by any of its indexes
    ///
    /// Expired sessions are destroyed on the spot and reported as absent.
    /// A successful lookup counts as activity and is written to the store.
    pub async fn get_session(&self, key: &str) -> Result<Option<Arc<Session>>, SessionError> {
        let Some(entry) = self.lookup(key).await? else {
            return Ok(None);
        };

        let session_id = entry.session_id().to_string();
        let touched = self
            .update_entry(&session_id, Some(entry), |session, _| {
                session.touch();
                true
            })
            .await?;
        Ok(touched.and_then(into_session))
    }

    /// Resolve a session without recording activity on it
    pub(crate) async fn peek_session(
        &self,
        key: &str,
    ) -> Result<Option<Arc<Session>>, SessionError> {
        Ok(self.lookup(key).await?.and_then(into_session))
    }

    /// Record activity on a session already resolved through `peek_session`
    pub(crate) async fn touch_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Arc<Session>>, SessionError> {
        let touched = self
            .update_entry(session_id, None, |session, _| {
                session.touch();
                true
            })
            .await?;
        Ok(touched.and_then(into_session))
    }

    /// Write the login record of `session` back to the store
    ///
    /// Principal, authentication methods and service records replace the
    /// stored ones; the index set and the later activity instant are kept.
    /// Returns `false` when the session no longer exists.
    pub async fn save_session(&self, session: &Session) -> Result<bool, SessionError> {
        let saved = self
            .update_entry(session.session_id(), None, |stored, _| {
                stored.absorb(session);
                true
            })
            .await?;
        Ok(saved.is_some())
    }

    /// Apply `update` to the stored session as one atomic change
    ///
    /// The change counts as activity. `update` runs again on a fresh copy when
    /// another writer got in first. Returns the updated session, or `None`
    /// when `key` resolves to no live session.
    pub async fn update_session<F>(
        &self,
        key: &str,
        mut update: F,
    ) -> Result<Option<Arc<Session>>, SessionError>
    where
        F: FnMut(&Session) + Send,
    {
        let Some(entry) = self.lookup(key).await? else {
            return Ok(None);
        };

        let session_id = entry.session_id().to_string();
        let updated = self
            .update_entry(&session_id, Some(entry), |session, _| {
                session.touch();
                update(session);
                true
            })
            .await?;
        Ok(updated.and_then(into_session))
    }

    /// Destroy a session and every index pointing at it
    ///
    /// `key` may be the session ID or any of its indexes. Destroying an
    /// unknown or already destroyed session does nothing.
    pub async fn destroy_session(&self, key: &str) -> Result<(), SessionError> {
        let partition = &self.config.partition;

        let Some(entry) = self.storage.get(partition, key).await? else {
            debug!("Destroy requested for unknown session key {}", key);
            return Ok(());
        };

        if entry.is_primary() {
            self.destroy_entry(entry, DestroyReason::Explicit).await?;
            return Ok(());
        }

        let session_id = entry.session_id().to_string();
        match self.storage.get(partition, &session_id).await? {
            Some(primary) if primary.is_primary() => {
                self.destroy_entry(primary, DestroyReason::Explicit).await?;
            }
            _ => debug!("Dropping orphaned index {}", key),
        }
        self.remove_pointer(key, &session_id).await?;
        Ok(())
    }

    /// Register an additional lookup key for a live session
    ///
    /// Returns `false` when the session does not exist or the key is bound to
    /// a different live session; `true` when the key now resolves (or already
    /// resolved) to `session`.
    pub async fn index_session(&self, session: &Session, index: &str) -> Result<bool, SessionError> {
        let partition = &self.config.partition;
        let session_id = session.session_id();

        let Some(primary) = self.lookup(session_id).await? else {
            debug!("Cannot index unknown session {}", session_id);
            return Ok(false);
        };

        if index == session_id {
            return Ok(true);
        }

        // The index set goes first, so a destroy running alongside also removes the pointer
        let listed = self
            .update_entry(session_id, Some(primary), |_, indexes| {
                indexes.insert(index.to_string())
            })
            .await?;
        if listed.is_none() {
            debug!("Session {} destroyed while being indexed", session_id);
            return Ok(false);
        }

        let mut bound = false;
        for _ in 0..2 {
            match self
                .storage
                .put_if_absent(partition, index, SessionIndexEntry::index(session_id))
                .await?
            {
                None => {
                    bound = true;
                    break;
                }
                Some(existing) if existing.points_to(session_id) => return Ok(true),
                Some(existing) => {
                    if !self.reclaim_stale_index(index, &existing).await? {
                        debug!(
                            "Index {} already bound to session {}",
                            index,
                            existing.session_id()
                        );
                        break;
                    }
                }
            }
        }

        if !bound {
            self.update_entry(session_id, None, |_, indexes| indexes.remove(index))
                .await?;
            return Ok(false);
        }

        // The session may have been destroyed between listing and binding
        if !self.storage.contains(partition, session_id).await? {
            self.remove_pointer(index, session_id).await?;
            debug!("Session {} destroyed while being indexed", session_id);
            return Ok(false);
        }

        debug!("Indexed session {} under {}", session_id, index);
        self.emit(SessionEvent::Indexed {
            session_id: session_id.to_string(),
            index: index.to_string(),
        });
        Ok(true)
    }

    /// Remove a secondary index without destroying its session
    pub async fn remove_session_index(&self, index: &str) -> Result<(), SessionError> {
        let Some(entry) = self.storage.get(&self.config.partition, index).await? else {
            return Ok(());
        };

        if entry.is_primary() {
            warn!("Refusing to remove primary session ID {} as an index", index);
            return Ok(());
        }

        let session_id = entry.session_id();
        if self.remove_pointer(index, session_id).await?.is_some() {
            self.update_entry(session_id, None, |_, indexes| indexes.remove(index))
                .await?;
            debug!("Removed index {} from session {}", index, session_id);
            self.emit(SessionEvent::IndexRemoved {
                session_id: session_id.to_string(),
                index: index.to_string(),
            });
        }
        Ok(())
    }

    /// Destroy every expired session in the store and drop orphaned indexes
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, SessionError> {
        let partition = &self.config.partition;
        let mut removed_count = 0u64;

        for key in self.storage.keys(partition).await? {
            let Some(entry) = self.storage.get(partition, &key).await? else {
                continue;
            };

            if entry.is_primary() {
                if entry.is_expired() && self.destroy_entry(entry, DestroyReason::Expired).await? {
                    removed_count += 1;
                }
            } else if !self.storage.contains(partition, entry.session_id()).await? {
                debug!("Dropping orphaned index {}", key);
                self.remove_pointer(&key, entry.session_id()).await?;
            }
        }

        if removed_count > 0 {
            info!("Cleaned up {} expired sessions", removed_count);
        }

        Ok(removed_count)
    }

    /// Start the background sweep if one is configured
    ///
    /// The task stops once the manager is dropped.
    pub fn start_cleanup_task(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let interval_secs = self.config.cleanup_interval_secs?;
        let manager: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            let mut cleanup_interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));

            loop {
                cleanup_interval.tick().await;

                let Some(manager) = manager.upgrade() else {
                    debug!("Session manager dropped, stopping cleanup task");
                    break;
                };

                match manager.cleanup_expired_sessions().await {
                    Ok(count) => {
                        if count > 0 {
                            debug!("Cleanup task removed {} expired sessions", count);
                        }
                    }
                    Err(e) => {
                        error!("Session cleanup failed: {}", e);
                    }
                }
            }
        }))
    }

    /// Resolve `key` to the primary entry of a live session
    async fn lookup(&self, key: &str) -> Result<Option<SessionIndexEntry>, SessionError> {
        let partition = &self.config.partition;
        let Some(entry) = self.storage.get(partition, key).await? else {
            return Ok(None);
        };

        let primary = if entry.is_primary() {
            entry
        } else {
            let session_id = entry.session_id();
            match self.storage.get(partition, session_id).await? {
                Some(primary) if primary.is_primary() && primary.session_id() == session_id => {
                    primary
                }
                _ => {
                    // An index must never outlive its session
                    debug!("Dropping orphaned index {}", key);
                    self.remove_pointer(key, session_id).await?;
                    return Ok(None);
                }
            }
        };

        if primary.is_expired() {
            debug!("Session {} expired, destroying", primary.session_id());
            self.destroy_entry(primary, DestroyReason::Expired).await?;
            return Ok(None);
        }

        Ok(Some(primary))
    }

    /// Read-modify-write of a primary entry
    ///
    /// `update` reports whether it changed anything; only changes are written.
    /// The write succeeds only if the stored version is the one read, otherwise
    /// the entry is read again and `update` reapplied. Returns the entry as
    /// stored afterwards, `None` once the session is gone or expired.
    async fn update_entry<F>(
        &self,
        session_id: &str,
        mut current: Option<SessionIndexEntry>,
        mut update: F,
    ) -> Result<Option<SessionIndexEntry>, SessionError>
    where
        F: FnMut(&Session, &mut BTreeSet<String>) -> bool + Send,
    {
        let partition = &self.config.partition;

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let entry = match current.take() {
                Some(entry) => entry,
                None => match self.storage.get(partition, session_id).await? {
                    Some(entry) => entry,
                    None => return Ok(None),
                },
            };

            let SessionIndexEntry::Primary {
                session,
                mut indexes,
                version,
            } = entry
            else {
                return Ok(None);
            };
            if session.session_id() != session_id || session.is_expired() {
                return Ok(None);
            }

            if !update(&session, &mut indexes) {
                return Ok(Some(SessionIndexEntry::Primary {
                    session,
                    indexes,
                    version,
                }));
            }

            let updated = SessionIndexEntry::Primary {
                session,
                indexes,
                version: version.wrapping_add(1),
            };
            let replaced = self
                .storage
                .replace_if(
                    partition,
                    session_id,
                    updated.clone(),
                    &|stored: &SessionIndexEntry| stored.is_primary_at(session_id, version),
                )
                .await?;
            if replaced.is_some() {
                return Ok(Some(updated));
            }

            debug!("Session {} changed while being updated, retrying", session_id);
        }

        Err(SessionError::UpdateConflict {
            session_id: session_id.to_string(),
        })
    }

    /// Remove the primary record and all indexes; returns whether the primary was present
    async fn destroy_entry(
        &self,
        entry: SessionIndexEntry,
        reason: DestroyReason,
    ) -> Result<bool, SessionError> {
        let session_id = entry.session_id();

        // Primary first, so concurrent index registrations see the session gone
        let removed = self
            .storage
            .remove_if(
                &self.config.partition,
                session_id,
                &|stored: &SessionIndexEntry| {
                    stored.is_primary() && stored.session_id() == session_id
                },
            )
            .await?;

        // The removed value carries the latest index set
        let indexes = removed.as_ref().unwrap_or(&entry).indexes();
        for index in indexes {
            if index != session_id {
                self.remove_pointer(&index, session_id).await?;
            }
        }

        if removed.is_some() {
            match reason {
                DestroyReason::Explicit => info!("Destroyed session {}", session_id),
                DestroyReason::Expired => info!("Destroyed expired session {}", session_id),
            }
            self.emit(SessionEvent::Destroyed {
                session_id: session_id.to_string(),
                reason,
            });
        }

        Ok(removed.is_some())
    }

    /// Clear a binding left behind by a dead session; returns whether it was cleared
    async fn reclaim_stale_index(
        &self,
        index: &str,
        existing: &SessionIndexEntry,
    ) -> Result<bool, SessionError> {
        if existing.is_primary() {
            // `index` is another session's primary ID
            if existing.is_expired() {
                self.destroy_entry(existing.clone(), DestroyReason::Expired)
                    .await?;
                return Ok(true);
            }
            return Ok(false);
        }

        let owner_id = existing.session_id();
        match self.storage.get(&self.config.partition, owner_id).await? {
            Some(owner) if owner.is_primary() && !owner.is_expired() => Ok(false),
            Some(owner) if owner.is_primary() => {
                self.destroy_entry(owner, DestroyReason::Expired).await?;
                self.remove_pointer(index, owner_id).await?;
                Ok(true)
            }
            _ => {
                self.remove_pointer(index, owner_id).await?;
                Ok(true)
            }
        }
    }

    async fn remove_pointer(
        &self,
        index: &str,
        session_id: &str,
    ) -> Result<Option<SessionIndexEntry>, SessionError> {
        Ok(self
            .storage
            .remove_if(&self.config.partition, index, &|stored: &SessionIndexEntry| {
                stored.points_to(session_id)
            })
            .await?)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

fn into_session(entry: SessionIndexEntry) -> Option<Arc<Session>> {
    match entry {
        SessionIndexEntry::Primary { session, .. } => Some(Arc::new(session)),
        SessionIndexEntry::Index { .. } => None,
    }
}
