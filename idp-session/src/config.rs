//! IdP session layer configuration

use crate::artifact::{ArtifactConfig, ArtifactError};
use crate::logging::LoggingConfig;
use crate::middleware::CookieConfig;
use crate::session::{SessionConfig, SessionError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid TOML for this schema
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The session or cookie section is invalid
    #[error("Invalid session configuration: {0}")]
    Session(#[from] SessionError),

    /// The artifact section is invalid
    #[error("Invalid artifact configuration: {0}")]
    Artifact(#[from] ArtifactError),
}

/// Complete configuration, one TOML table per component
///
/// ```toml
/// [session]
/// inactivity_timeout_ms = 1800000
///
/// [cookie]
/// consistent_address = true
///
/// [artifact]
/// issuer_entity_id = "https://idp.example.org/idp/shibboleth"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdpSessionConfig {
    /// Session manager settings
    pub session: SessionConfig,
    /// Session cookie settings
    pub cookie: CookieConfig,
    /// Artifact issuance settings
    pub artifact: ArtifactConfig,
    /// Log output settings
    pub logging: LoggingConfig,
}

impl IdpSessionConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        self.cookie.validate()?;
        self.artifact.validate()?;
        Ok(())
    }
}
