//! Artifact generation and single-use recovery

use crate::artifact::types::{
    Artifact, HANDLE_LENGTH, SOURCE_ID_LENGTH, TYPE_CODE_1, TYPE_CODE_2, TYPE_CODE_4,
};
use crate::artifact::{ArtifactDecodeError, ArtifactMapping};
use crate::crypto::{self, CryptoError, OsRandomSource, RandomSource};
use crate::storage::{ExpiringObject, StorageError, StorageService};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Attempts at finding an unused artifact before giving up
const MAX_HANDLE_ATTEMPTS: usize = 3;

/// Errors raised while issuing or resolving artifacts
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The backing store failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The random source failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Invalid configuration, reported at construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An encoded artifact could not be parsed
    #[error("Invalid artifact: {0}")]
    Decode(#[from] ArtifactDecodeError),

    /// No unused artifact could be generated
    #[error("Artifact generation failed: {reason}")]
    GenerationFailed {
        /// What went wrong
        reason: String,
    },
}

/// Artifact issuance configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Entity ID of this IdP; its SHA-1 is the artifact source ID
    pub issuer_entity_id: String,

    /// Artifact resolution endpoint advertised in type 0x0002 artifacts
    pub source_location: Option<String>,

    /// Refuse to start without a source location
    pub require_source_location: bool,

    /// Storage partition holding artifact mappings
    pub partition: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            issuer_entity_id: String::new(),
            source_location: None,
            require_source_location: false,
            partition: "artifactStore".to_string(),
        }
    }
}

impl ArtifactConfig {
    /// Configuration for the IdP identified by `issuer_entity_id`
    pub fn new(issuer_entity_id: impl Into<String>) -> Self {
        Self {
            issuer_entity_id: issuer_entity_id.into(),
            ..Default::default()
        }
    }

    /// Advertise `source_location` in type 0x0002 artifacts
    pub fn with_source_location(mut self, source_location: impl Into<String>) -> Self {
        self.source_location = Some(source_location.into());
        self
    }

    /// Check the configuration before any artifact is issued
    pub fn validate(&self) -> Result<(), ArtifactError> {
        if self.issuer_entity_id.trim().is_empty() {
            return Err(ArtifactError::Configuration(
                "issuer entity ID must not be empty".to_string(),
            ));
        }
        if self.partition.trim().is_empty() {
            return Err(ArtifactError::Configuration(
                "artifact partition name must not be empty".to_string(),
            ));
        }
        match &self.source_location {
            Some(location) => {
                url::Url::parse(location).map_err(|e| {
                    ArtifactError::Configuration(format!(
                        "invalid artifact source location {location}: {e}"
                    ))
                })?;
            }
            None if self.require_source_location => {
                return Err(ArtifactError::Configuration(
                    "artifact source location is required but not configured".to_string(),
                ));
            }
            None => {}
        }
        Ok(())
    }
}

/// The recipient of an artifact and its artifact preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingParty {
    /// Entity ID of the relying party
    pub entity_id: String,

    /// Preferred artifact type code
    #[serde(default = "default_artifact_type")]
    pub artifact_type: u16,

    /// Resolution endpoint index placed in type 0x0004 artifacts
    #[serde(default)]
    pub endpoint_index: u16,
}

fn default_artifact_type() -> u16 {
    TYPE_CODE_1
}

impl RelyingParty {
    /// Relying party `entity_id`, preferring type 0x0001 artifacts
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            artifact_type: TYPE_CODE_1,
            endpoint_index: 0,
        }
    }

    /// Prefer `artifact_type`; unsupported codes fall back to 0x0001
    pub fn with_artifact_type(mut self, artifact_type: u16) -> Self {
        self.artifact_type = artifact_type;
        self
    }

    /// Endpoint index placed in type 0x0004 artifacts
    pub fn with_endpoint_index(mut self, endpoint_index: u16) -> Self {
        self.endpoint_index = endpoint_index;
        self
    }
}

/// Issues artifacts for assertions and resolves them exactly once
pub struct ArtifactMapper {
    config: ArtifactConfig,
    source_id: [u8; SOURCE_ID_LENGTH],
    storage: Arc<dyn StorageService<ArtifactMapping>>,
    random: Arc<dyn RandomSource>,
}

impl ArtifactMapper {
    /// Mapper drawing handles from the OS random source
    pub fn new(
        config: ArtifactConfig,
        storage: Arc<dyn StorageService<ArtifactMapping>>,
    ) -> Result<Self, ArtifactError> {
        Self::with_random_source(config, storage, Arc::new(OsRandomSource))
    }

    /// Mapper drawing handles from `random`
    pub fn with_random_source(
        config: ArtifactConfig,
        storage: Arc<dyn StorageService<ArtifactMapping>>,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self, ArtifactError> {
        config.validate()?;
        crypto::init(random.as_ref())?;

        let source_id = crypto::sha1_digest(config.issuer_entity_id.as_bytes());
        debug!(
            "Artifact source ID for {} is {}",
            config.issuer_entity_id,
            hex::encode(source_id)
        );

        Ok(Self {
            config,
            source_id,
            storage,
            random,
        })
    }

    /// Configuration in effect
    pub fn config(&self) -> &ArtifactConfig {
        &self.config
    }

    /// SHA-1 of the issuer entity ID
    pub fn source_id(&self) -> &[u8; SOURCE_ID_LENGTH] {
        &self.source_id
    }

    /// Issue an artifact standing in for `assertion`, bound to `relying_party`
    pub async fn generate_artifact(
        &self,
        assertion: impl Into<String>,
        relying_party: &RelyingParty,
    ) -> Result<Artifact, ArtifactError> {
        let assertion = assertion.into();

        for _ in 0..MAX_HANDLE_ATTEMPTS {
            let artifact = self.build_artifact(relying_party)?;
            let key = artifact.to_base64();
            let mapping = ArtifactMapping::new(
                key.clone(),
                assertion.clone(),
                relying_party.entity_id.clone(),
            );

            if self
                .storage
                .put_if_absent(&self.config.partition, &key, mapping)
                .await?
                .is_none()
            {
                info!(
                    "Issued type {:#06x} artifact for {}",
                    artifact.type_code(),
                    relying_party.entity_id
                );
                return Ok(artifact);
            }
            warn!("Generated artifact already in use, regenerating");
        }

        Err(ArtifactError::GenerationFailed {
            reason: "could not generate an unused artifact".to_string(),
        })
    }

    /// Remove and return the mapping for `artifact`
    ///
    /// The mapping is gone after this call whatever the outcome. Expired
    /// mappings are reported as absent. Callers must still check
    /// [`ArtifactMapping::is_correct_provider`] against the requester.
    pub async fn recover_assertion(
        &self,
        artifact: &Artifact,
    ) -> Result<Option<ArtifactMapping>, ArtifactError> {
        let key = artifact.to_base64();
        let Some(mapping) = self.storage.remove(&self.config.partition, &key).await? else {
            debug!("No mapping for artifact {}", key);
            return Ok(None);
        };

        if mapping.is_expired() {
            debug!("Artifact {} expired before resolution", key);
            return Ok(None);
        }

        Ok(Some(mapping))
    }

    /// Recover using the base64 form received from a relying party
    ///
    /// Undecodable input is treated as an unknown artifact.
    pub async fn recover_encoded(
        &self,
        encoded: &str,
    ) -> Result<Option<ArtifactMapping>, ArtifactError> {
        match Artifact::from_base64(encoded) {
            Ok(artifact) => self.recover_assertion(&artifact).await,
            Err(e) => {
                debug!("Rejecting malformed artifact: {}", e);
                Ok(None)
            }
        }
    }

    /// Drop every expired mapping still in the store
    pub async fn cleanup_expired(&self) -> Result<u64, ArtifactError> {
        let partition = &self.config.partition;
        let mut removed_count = 0u64;

        for key in self.storage.keys(partition).await? {
            let removed = self
                .storage
                .remove_if(partition, &key, &|mapping: &ArtifactMapping| {
                    mapping.is_expired()
                })
                .await?;
            if removed.is_some() {
                removed_count += 1;
            }
        }

        if removed_count > 0 {
            info!("Cleaned up {} expired artifact mappings", removed_count);
        }

        Ok(removed_count)
    }

    fn build_artifact(&self, relying_party: &RelyingParty) -> Result<Artifact, ArtifactError> {
        let handle: [u8; HANDLE_LENGTH] = crypto::generate_handle(self.random.as_ref())?;

        let artifact = match relying_party.artifact_type {
            TYPE_CODE_1 => self.type1(handle),
            TYPE_CODE_2 => match &self.config.source_location {
                Some(source_location) => Artifact::Type2 {
                    assertion_handle: handle,
                    source_location: source_location.clone(),
                },
                None => {
                    warn!(
                        "Type 0x0002 artifact requested for {} but no source location is configured, using type 0x0001",
                        relying_party.entity_id
                    );
                    self.type1(handle)
                }
            },
            TYPE_CODE_4 => Artifact::Type4 {
                endpoint_index: relying_party.endpoint_index,
                source_id: self.source_id,
                message_handle: handle,
            },
            other => {
                warn!(
                    "Unsupported artifact type {:#06x} requested for {}, using type 0x0001",
                    other, relying_party.entity_id
                );
                self.type1(handle)
            }
        };

        Ok(artifact)
    }

    fn type1(&self, handle: [u8; HANDLE_LENGTH]) -> Artifact {
        Artifact::Type1 {
            source_id: self.source_id,
            assertion_handle: handle,
        }
    }
}
