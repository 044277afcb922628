//! SHA-1 digests and HMAC-SHA1 signatures
//!
//! SHA-1 is kept for wire compatibility: SAML artifact source IDs are
//! defined as the SHA-1 of the issuer entity ID, and existing cookies are
//! signed with HMAC-SHA1. A fresh hasher is created for every call, so
//! nothing here shares digest state between threads.

use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// Length of a SHA-1 digest in bytes
pub const SHA1_LENGTH: usize = 20;

/// Length of an HMAC-SHA1 signature in bytes
pub const HMAC_SHA1_LENGTH: usize = 20;

/// SHA-1 digest of `data`
pub fn sha1_digest(data: &[u8]) -> [u8; SHA1_LENGTH] {
    Sha1::digest(data).into()
}

/// HMAC-SHA1 over the concatenation of `parts`
pub fn hmac_sha1(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key).expect("HMAC can take key of any size");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}

/// Verify an HMAC-SHA1 signature in constant time
pub fn verify_hmac_sha1(key: &[u8], parts: &[&[u8]], signature: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    let computed = hmac_sha1(key, parts);
    if computed.len() != signature.len() {
        return false;
    }

    computed.ct_eq(signature).into()
}
