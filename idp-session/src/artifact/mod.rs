//! SAML artifact issuance and resolution
//!
//! An artifact is a short reference handed to a relying party through the
//! browser in place of a full assertion. The relying party later trades it,
//! exactly once, for the assertion over a back channel.

pub mod mapper;
pub mod mapping;
pub mod types;

pub use mapper::{ArtifactConfig, ArtifactError, ArtifactMapper, RelyingParty};
pub use mapping::{ArtifactMapping, ARTIFACT_LIFETIME_SECS};
pub use types::{
    Artifact, ArtifactDecodeError, HANDLE_LENGTH, SOURCE_ID_LENGTH, TYPE_CODE_1, TYPE_CODE_2,
    TYPE_CODE_4,
};
