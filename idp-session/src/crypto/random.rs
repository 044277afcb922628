//! Secure random identifiers and secrets
//!
//! Everything here draws from a [`RandomSource`]. The default source is the
//! operating system CSPRNG; a general-purpose PRNG must never be plugged in.

use super::CryptoError;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

/// Number of random bytes in a session identifier (hex encoded on the wire)
pub const SESSION_ID_LENGTH: usize = 32;

/// Number of random bytes in a per-session cookie signing secret
pub const SESSION_SECRET_LENGTH: usize = 16;

/// Source of cryptographically secure random bytes
pub trait RandomSource: Send + Sync {
    /// Fill `dest` entirely with random bytes
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<(), CryptoError>;
}

/// Random source backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandomSource;

impl RandomSource for OsRandomSource {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<(), CryptoError> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| CryptoError::RandomnessError(e.to_string()))
    }
}

/// Generate a new session identifier: 32 random bytes, lowercase hex
pub fn generate_session_id(random: &dyn RandomSource) -> Result<String, CryptoError> {
    let mut bytes = [0u8; SESSION_ID_LENGTH];
    random.fill_bytes(&mut bytes)?;
    Ok(hex::encode(bytes))
}

/// Generate a new per-session signing secret
pub fn generate_session_secret(
    random: &dyn RandomSource,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut secret = Zeroizing::new(vec![0u8; SESSION_SECRET_LENGTH]);
    random.fill_bytes(secret.as_mut_slice())?;
    Ok(secret)
}

/// Generate a fixed-size random handle (artifact assertion/message handles)
pub fn generate_handle<const N: usize>(random: &dyn RandomSource) -> Result<[u8; N], CryptoError> {
    let mut handle = [0u8; N];
    random.fill_bytes(&mut handle)?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id(&OsRandomSource).unwrap();

        assert_eq!(id.len(), SESSION_ID_LENGTH * 2);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_session_ids_are_distinct() {
        let ids: HashSet<String> = (0..500)
            .map(|_| generate_session_id(&OsRandomSource).unwrap())
            .collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_session_secret_length() {
        let secret1 = generate_session_secret(&OsRandomSource).unwrap();
        let secret2 = generate_session_secret(&OsRandomSource).unwrap();

        assert_eq!(secret1.len(), SESSION_SECRET_LENGTH);
        assert_ne!(secret1.as_slice(), secret2.as_slice());
    }

    #[test]
    fn test_generate_handle() {
        let h1: [u8; 20] = generate_handle(&OsRandomSource).unwrap();
        let h2: [u8; 20] = generate_handle(&OsRandomSource).unwrap();
        assert_ne!(h1, h2);
    }
}
