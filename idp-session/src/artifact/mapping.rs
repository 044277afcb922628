//! Single-use binding of an artifact to the assertion it stands for

use crate::storage::ExpiringObject;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifetime of an artifact mapping in seconds
pub const ARTIFACT_LIFETIME_SECS: i64 = 5 * 60;

/// An issued artifact and the assertion it resolves to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMapping {
    artifact: String,
    assertion: String,
    relying_party_id: String,
    expiration_instant: DateTime<Utc>,
}

impl ArtifactMapping {
    /// New mapping expiring five minutes from now
    pub fn new(
        artifact: impl Into<String>,
        assertion: impl Into<String>,
        relying_party_id: impl Into<String>,
    ) -> Self {
        Self::with_expiration(
            artifact,
            assertion,
            relying_party_id,
            Utc::now() + Duration::seconds(ARTIFACT_LIFETIME_SECS),
        )
    }

    /// Rebuild a mapping whose expiration was fixed elsewhere (e.g. a shared store)
    pub fn with_expiration(
        artifact: impl Into<String>,
        assertion: impl Into<String>,
        relying_party_id: impl Into<String>,
        expiration_instant: DateTime<Utc>,
    ) -> Self {
        Self {
            artifact: artifact.into(),
            assertion: assertion.into(),
            relying_party_id: relying_party_id.into(),
            expiration_instant,
        }
    }

    /// Base64 encoding of the artifact
    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    /// The serialized assertion, exactly as it was handed in
    pub fn assertion(&self) -> &str {
        &self.assertion
    }

    /// Entity ID of the party the artifact was issued to
    pub fn relying_party_id(&self) -> &str {
        &self.relying_party_id
    }

    /// Whether `relying_party_id` is the party this artifact was issued to
    pub fn is_correct_provider(&self, relying_party_id: &str) -> bool {
        self.relying_party_id == relying_party_id
    }

    /// Take the assertion out of the mapping
    pub fn into_assertion(self) -> String {
        self.assertion
    }
}

impl ExpiringObject for ArtifactMapping {
    fn expiration_instant(&self) -> DateTime<Utc> {
        self.expiration_instant
    }
}
