//! Stored values of the session partition
//!
//! A session's primary ID maps to a [`SessionIndexEntry::Primary`] holding a
//! snapshot of the session and the set of keys bound to it. Every secondary
//! index maps to a [`SessionIndexEntry::Index`] that only names the primary ID.

use crate::session::Session;
use crate::storage::ExpiringObject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Value stored in the session partition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionIndexEntry {
    /// The session record, stored under its primary ID
    Primary {
        /// Snapshot of the session
        session: Session,
        /// Every key bound to the session, primary ID included
        indexes: BTreeSet<String>,
        /// Bumped on every write; guards read-modify-write updates
        version: u64,
    },

    /// A secondary index pointing at a primary ID
    Index {
        /// Primary ID of the indexed session
        session_id: String,
    },
}

impl SessionIndexEntry {
    /// Primary entry for a freshly created session
    pub fn primary(session: Session) -> Self {
        let mut indexes = BTreeSet::new();
        indexes.insert(session.session_id().to_string());

        Self::Primary {
            session,
            indexes,
            version: 0,
        }
    }

    /// Pointer binding a secondary index to `session_id`
    pub fn index(session_id: impl Into<String>) -> Self {
        Self::Index {
            session_id: session_id.into(),
        }
    }

    /// Primary ID of the session this entry belongs to
    pub fn session_id(&self) -> &str {
        match self {
            Self::Primary { session, .. } => session.session_id(),
            Self::Index { session_id } => session_id,
        }
    }

    /// Whether this entry holds the session record itself
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Primary { .. })
    }

    /// The session snapshot of a primary entry
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Primary { session, .. } => Some(session),
            Self::Index { .. } => None,
        }
    }

    /// Keys bound to the session; empty for an index pointer
    pub fn indexes(&self) -> Vec<String> {
        match self {
            Self::Primary { indexes, .. } => indexes.iter().cloned().collect(),
            Self::Index { .. } => Vec::new(),
        }
    }

    /// Whether `index` is bound to the session of this primary entry
    pub fn has_index(&self, index: &str) -> bool {
        match self {
            Self::Primary { indexes, .. } => indexes.contains(index),
            Self::Index { .. } => false,
        }
    }

    pub(crate) fn version(&self) -> Option<u64> {
        match self {
            Self::Primary { version, .. } => Some(*version),
            Self::Index { .. } => None,
        }
    }

    /// Whether this is the primary entry of `session_id` at `version`
    pub(crate) fn is_primary_at(&self, session_id: &str, version: u64) -> bool {
        self.session_id() == session_id && self.version() == Some(version)
    }

    /// Whether this is an index pointer to `session_id`
    pub(crate) fn points_to(&self, session_id: &str) -> bool {
        matches!(self, Self::Index { session_id: target } if target == session_id)
    }
}

impl ExpiringObject for SessionIndexEntry {
    /// Index pointers never expire on their own; they go with their session
    fn expiration_instant(&self) -> DateTime<Utc> {
        match self {
            Self::Primary { session, .. } => session.expiration_instant(),
            Self::Index { .. } => DateTime::<Utc>::MAX_UTC,
        }
    }
}
