//! Cryptographic primitives shared by sessions and artifacts
//!
//! Random identifier and secret generation, SHA-1 digests and the
//! HMAC-SHA1 used to sign session cookies.

pub mod hashing;
pub mod random;

pub use hashing::{hmac_sha1, sha1_digest, verify_hmac_sha1, HMAC_SHA1_LENGTH, SHA1_LENGTH};
pub use random::{
    generate_handle, generate_session_id, generate_session_secret, OsRandomSource, RandomSource,
    SESSION_ID_LENGTH, SESSION_SECRET_LENGTH,
};

/// General crypto error type
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The random source failed or looks broken
    #[error("Randomness error: {0}")]
    RandomnessError(String),
}

/// Verify the random source produces usable output
///
/// Intended to be called once at startup, so that a broken entropy source
/// fails the process before the first session is issued.
pub fn init(random: &dyn RandomSource) -> Result<(), CryptoError> {
    let mut test_bytes = [0u8; 32];
    random.fill_bytes(&mut test_bytes)?;

    if test_bytes.iter().all(|&b| b == 0) {
        return Err(CryptoError::RandomnessError(
            "Failed to generate random bytes".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ZeroSource;

    impl RandomSource for ZeroSource {
        fn fill_bytes(&self, dest: &mut [u8]) -> Result<(), CryptoError> {
            dest.fill(0);
            Ok(())
        }
    }

    #[test]
    fn test_crypto_init() {
        assert!(init(&OsRandomSource).is_ok());
    }

    #[test]
    fn test_crypto_init_rejects_zero_source() {
        assert!(matches!(
            init(&ZeroSource),
            Err(CryptoError::RandomnessError(_))
        ));
    }
}
