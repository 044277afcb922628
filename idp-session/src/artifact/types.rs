//! SAML artifact wire formats
//!
//! Byte layouts follow the SAML 1.1 browser/artifact profile (type codes
//! `0x0001` and `0x0002`) and the SAML 2.0 artifact binding (`0x0004`).
//! Artifacts travel base64 encoded.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;
use thiserror::Error;

/// SAML 1.x artifact carrying the issuer's source ID
pub const TYPE_CODE_1: u16 = 0x0001;

/// SAML 1.x artifact carrying the issuer's resolution endpoint
pub const TYPE_CODE_2: u16 = 0x0002;

/// SAML 2.0 artifact
pub const TYPE_CODE_4: u16 = 0x0004;

/// Length of a source ID (SHA-1 of the issuer entity ID)
pub const SOURCE_ID_LENGTH: usize = 20;

/// Length of an assertion or message handle
pub const HANDLE_LENGTH: usize = 20;

const TYPE_CODE_LENGTH: usize = 2;
const ENDPOINT_INDEX_LENGTH: usize = 2;
const TYPE_1_LENGTH: usize = TYPE_CODE_LENGTH + SOURCE_ID_LENGTH + HANDLE_LENGTH;
const TYPE_4_LENGTH: usize =
    TYPE_CODE_LENGTH + ENDPOINT_INDEX_LENGTH + SOURCE_ID_LENGTH + HANDLE_LENGTH;

/// Why an encoded artifact could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactDecodeError {
    /// Not valid base64
    #[error("Artifact is not valid base64")]
    InvalidBase64,

    /// Shorter than the type code
    #[error("Artifact is too short to carry a type code")]
    TooShort,

    /// Type code this IdP does not issue
    #[error("Unsupported artifact type code {0:#06x}")]
    UnsupportedType(u16),

    /// Wrong length for the type
    #[error("Artifact type {type_code:#06x} must be {expected} bytes, got {actual}")]
    InvalidLength {
        /// Type code read
        type_code: u16,
        /// Length the type requires
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// Type 0x0002 location missing or not UTF-8
    #[error("Artifact source location is missing or not valid UTF-8")]
    InvalidSourceLocation,
}

/// A decoded SAML artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// `0x0001 ‖ SourceID ‖ AssertionHandle`
    Type1 {
        /// SHA-1 of the issuer entity ID
        source_id: [u8; SOURCE_ID_LENGTH],
        /// Random handle naming the assertion
        assertion_handle: [u8; HANDLE_LENGTH],
    },
    /// `0x0002 ‖ AssertionHandle ‖ SourceLocation`
    Type2 {
        /// Random handle naming the assertion
        assertion_handle: [u8; HANDLE_LENGTH],
        /// Artifact resolution service URL
        source_location: String,
    },
    /// `0x0004 ‖ EndpointIndex ‖ SourceID ‖ MessageHandle`
    Type4 {
        /// Index of the resolution endpoint
        endpoint_index: u16,
        /// SHA-1 of the issuer entity ID
        source_id: [u8; SOURCE_ID_LENGTH],
        /// Random handle naming the message
        message_handle: [u8; HANDLE_LENGTH],
    },
}

impl Artifact {
    /// Two-byte type code
    pub fn type_code(&self) -> u16 {
        match self {
            Artifact::Type1 { .. } => TYPE_CODE_1,
            Artifact::Type2 { .. } => TYPE_CODE_2,
            Artifact::Type4 { .. } => TYPE_CODE_4,
        }
    }

    /// Issuer source ID, for the types that carry one
    pub fn source_id(&self) -> Option<&[u8; SOURCE_ID_LENGTH]> {
        match self {
            Artifact::Type1 { source_id, .. } | Artifact::Type4 { source_id, .. } => Some(source_id),
            Artifact::Type2 { .. } => None,
        }
    }

    /// Wire encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(TYPE_4_LENGTH);
        bytes.extend_from_slice(&self.type_code().to_be_bytes());

        match self {
            Artifact::Type1 {
                source_id,
                assertion_handle,
            } => {
                bytes.extend_from_slice(source_id);
                bytes.extend_from_slice(assertion_handle);
            }
            Artifact::Type2 {
                assertion_handle,
                source_location,
            } => {
                bytes.extend_from_slice(assertion_handle);
                bytes.extend_from_slice(source_location.as_bytes());
            }
            Artifact::Type4 {
                endpoint_index,
                source_id,
                message_handle,
            } => {
                bytes.extend_from_slice(&endpoint_index.to_be_bytes());
                bytes.extend_from_slice(source_id);
                bytes.extend_from_slice(message_handle);
            }
        }

        bytes
    }

    /// Parse the wire encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArtifactDecodeError> {
        if bytes.len() < TYPE_CODE_LENGTH {
            return Err(ArtifactDecodeError::TooShort);
        }
        let type_code = u16::from_be_bytes([bytes[0], bytes[1]]);
        let body = &bytes[TYPE_CODE_LENGTH..];

        match type_code {
            TYPE_CODE_1 => {
                expect_length(type_code, TYPE_1_LENGTH, bytes.len())?;
                Ok(Artifact::Type1 {
                    source_id: fixed(&body[..SOURCE_ID_LENGTH]),
                    assertion_handle: fixed(&body[SOURCE_ID_LENGTH..]),
                })
            }
            TYPE_CODE_2 => {
                if body.len() <= HANDLE_LENGTH {
                    return Err(ArtifactDecodeError::InvalidSourceLocation);
                }
                let source_location = std::str::from_utf8(&body[HANDLE_LENGTH..])
                    .map_err(|_| ArtifactDecodeError::InvalidSourceLocation)?
                    .to_string();
                Ok(Artifact::Type2 {
                    assertion_handle: fixed(&body[..HANDLE_LENGTH]),
                    source_location,
                })
            }
            TYPE_CODE_4 => {
                expect_length(type_code, TYPE_4_LENGTH, bytes.len())?;
                let source_start = ENDPOINT_INDEX_LENGTH;
                let handle_start = source_start + SOURCE_ID_LENGTH;
                Ok(Artifact::Type4 {
                    endpoint_index: u16::from_be_bytes([body[0], body[1]]),
                    source_id: fixed(&body[source_start..handle_start]),
                    message_handle: fixed(&body[handle_start..]),
                })
            }
            other => Err(ArtifactDecodeError::UnsupportedType(other)),
        }
    }

    /// Base64 of the wire encoding
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Parse base64 as received from a relying party
    pub fn from_base64(encoded: &str) -> Result<Self, ArtifactDecodeError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|_| ArtifactDecodeError::InvalidBase64)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

fn expect_length(type_code: u16, expected: usize, actual: usize) -> Result<(), ArtifactDecodeError> {
    if expected != actual {
        return Err(ArtifactDecodeError::InvalidLength {
            type_code,
            expected,
            actual,
        });
    }
    Ok(())
}

// Callers slice exactly N bytes
fn fixed<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type1_layout() {
        let artifact = Artifact::Type1 {
            source_id: [0xAA; 20],
            assertion_handle: [0xBB; 20],
        };
        let bytes = artifact.to_bytes();

        assert_eq!(bytes.len(), 42);
        assert_eq!(&bytes[..2], &[0x00, 0x01]);
        assert_eq!(&bytes[2..22], &[0xAA; 20]);
        assert_eq!(&bytes[22..], &[0xBB; 20]);
        assert_eq!(Artifact::from_bytes(&bytes).unwrap(), artifact);
    }

    #[test]
    fn test_type2_layout() {
        let artifact = Artifact::Type2 {
            assertion_handle: [0x11; 20],
            source_location: "https://idp.example.org/idp/profile/SAML1/SOAP/ArtifactResolution"
                .to_string(),
        };
        let bytes = artifact.to_bytes();

        assert_eq!(&bytes[..2], &[0x00, 0x02]);
        assert_eq!(&bytes[2..22], &[0x11; 20]);
        assert_eq!(
            &bytes[22..],
            b"https://idp.example.org/idp/profile/SAML1/SOAP/ArtifactResolution"
        );
        assert_eq!(artifact.source_id(), None);
        assert_eq!(Artifact::from_base64(&artifact.to_base64()).unwrap(), artifact);
    }

    #[test]
    fn test_type4_layout() {
        let artifact = Artifact::Type4 {
            endpoint_index: 0x0102,
            source_id: [0x22; 20],
            message_handle: [0x33; 20],
        };
        let bytes = artifact.to_bytes();

        assert_eq!(bytes.len(), 44);
        assert_eq!(&bytes[..4], &[0x00, 0x04, 0x01, 0x02]);
        assert_eq!(&bytes[4..24], &[0x22; 20]);
        assert_eq!(&bytes[24..], &[0x33; 20]);
        assert_eq!(artifact.source_id(), Some(&[0x22; 20]));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            Artifact::from_base64("not base64!"),
            Err(ArtifactDecodeError::InvalidBase64)
        );
        assert_eq!(Artifact::from_bytes(&[0x00]), Err(ArtifactDecodeError::TooShort));
        assert_eq!(
            Artifact::from_bytes(&[0x00, 0x03, 0x00]),
            Err(ArtifactDecodeError::UnsupportedType(3))
        );
        assert_eq!(
            Artifact::from_bytes(&[0x00, 0x01, 0x00]),
            Err(ArtifactDecodeError::InvalidLength {
                type_code: 1,
                expected: 42,
                actual: 3
            })
        );

        let mut no_location = vec![0x00, 0x02];
        no_location.extend_from_slice(&[0u8; 20]);
        assert_eq!(
            Artifact::from_bytes(&no_location),
            Err(ArtifactDecodeError::InvalidSourceLocation)
        );
    }
}
