/// Refresh Secret Hashing
///
/// Refresh token secrets are stored as HMAC-SHA512 fingerprints keyed by a
/// per-record random salt. Hash and salt are kept base64-encoded; the
/// plaintext secret is never stored.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use subtle::ConstantTimeEq;

use crate::auth::providers::RandomSource;

type HmacSha512 = Hmac<Sha512>;

pub const SALT_LENGTH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("stored salt is not valid base64")]
    InvalidSalt,
    #[error("salt rejected as HMAC key")]
    InvalidKey,
}

/// Base64-encoded fingerprint of a secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretHash {
    pub hash: String,
    pub salt: String,
}

#[derive(Clone)]
pub struct SecretHasher {
    random: Arc<dyn RandomSource>,
}

impl SecretHasher {
    pub fn new(random: Arc<dyn RandomSource>) -> Self {
        Self { random }
    }

    /// Hash `secret` under a freshly generated salt
    ///
    /// # Errors
    /// Returns `HashError::InvalidKey` if the MAC rejects the salt
    pub fn hash_with_new_salt(&self, secret: &str) -> Result<SecretHash, HashError> {
        let mut salt = [0u8; SALT_LENGTH];
        self.random.fill_bytes(&mut salt);

        Ok(SecretHash {
            hash: STANDARD.encode(mac(secret, &salt)?),
            salt: STANDARD.encode(salt),
        })
    }

    /// Hash `secret` under an existing base64 salt
    ///
    /// # Errors
    /// Returns `HashError::InvalidSalt` if the salt does not decode
    pub fn hash_with_salt(&self, secret: &str, salt: &str) -> Result<String, HashError> {
        let salt = STANDARD.decode(salt).map_err(|_| HashError::InvalidSalt)?;
        Ok(STANDARD.encode(mac(secret, &salt)?))
    }

    /// Check `secret` against a stored fingerprint without leaking where
    /// the hashes differ. An undecodable stored hash never matches.
    ///
    /// # Errors
    /// Returns `HashError::InvalidSalt` if the salt does not decode
    pub fn verify(&self, secret: &str, stored: &SecretHash) -> Result<bool, HashError> {
        let salt = STANDARD.decode(&stored.salt).map_err(|_| HashError::InvalidSalt)?;
        let computed = mac(secret, &salt)?;

        match STANDARD.decode(&stored.hash) {
            Ok(expected) => Ok(constant_time_equals(&computed, &expected)),
            Err(_) => Ok(false),
        }
    }
}

fn mac(secret: &str, salt: &[u8]) -> Result<Vec<u8>, HashError> {
    let mut mac = <HmacSha512 as KeyInit>::new_from_slice(salt).map_err(|_| HashError::InvalidKey)?;
    mac.update(secret.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Byte equality in time independent of the first differing position.
/// Lengths are not secret: unequal lengths return false immediately.
pub fn constant_time_equals(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::providers::{OsRandom, SeededRandom};

    fn hasher() -> SecretHasher {
        SecretHasher::new(Arc::new(OsRandom))
    }

    #[test]
    fn test_hash_with_salt_is_deterministic() {
        let hasher = hasher();
        let stored = hasher.hash_with_new_salt("opaque-secret").unwrap();

        let again = hasher.hash_with_salt("opaque-secret", &stored.salt).unwrap();
        let third = hasher.hash_with_salt("opaque-secret", &stored.salt).unwrap();

        assert_eq!(again, stored.hash);
        assert_eq!(again, third);
    }

    #[test]
    fn test_fresh_salts_differ() {
        let hasher = hasher();
        let a = hasher.hash_with_new_salt("opaque-secret").unwrap();
        let b = hasher.hash_with_new_salt("opaque-secret").unwrap();

        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
        assert_eq!(STANDARD.decode(&a.salt).unwrap().len(), SALT_LENGTH);
        // SHA-512 output
        assert_eq!(STANDARD.decode(&a.hash).unwrap().len(), 64);
    }

    #[test]
    fn test_seeded_salts_reproducible() {
        let a = SecretHasher::new(Arc::new(SeededRandom::new(42))).hash_with_new_salt("s").unwrap();
        let b = SecretHasher::new(Arc::new(SeededRandom::new(42))).hash_with_new_salt("s").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_verify() {
        let hasher = hasher();
        let stored = hasher.hash_with_new_salt("opaque-secret").unwrap();

        assert!(hasher.verify("opaque-secret", &stored).unwrap());
        assert!(!hasher.verify("opaque-secreT", &stored).unwrap());
        assert!(!hasher.verify("", &stored).unwrap());
    }

    #[test]
    fn test_verify_corrupted_hash_never_matches() {
        let hasher = hasher();
        let mut stored = hasher.hash_with_new_salt("opaque-secret").unwrap();
        stored.hash = "not base64!".to_string();
        assert!(!hasher.verify("opaque-secret", &stored).unwrap());

        stored.hash = STANDARD.encode([0u8; 16]);
        assert!(!hasher.verify("opaque-secret", &stored).unwrap());
    }

    #[test]
    fn test_any_salt_length_is_a_valid_key() {
        let hasher = hasher();
        let long_salt = STANDARD.encode([7u8; 200]);
        for salt in ["", "AA==", long_salt.as_str()] {
            let hash = hasher.hash_with_salt("opaque-secret", salt).unwrap();
            let stored = SecretHash {
                hash,
                salt: salt.to_string(),
            };
            assert!(hasher.verify("opaque-secret", &stored).unwrap());
        }
    }

    #[test]
    fn test_invalid_salt() {
        let hasher = hasher();
        assert!(hasher.hash_with_salt("secret", "%%%").is_err());
    }

    #[test]
    fn test_constant_time_equals() {
        assert!(constant_time_equals(b"abc", b"abc"));
        assert!(constant_time_equals(b"", b""));
        assert!(!constant_time_equals(b"abc", b"abd"));
        assert!(!constant_time_equals(b"xbc", b"abc"));
        assert!(!constant_time_equals(b"abc", b"abcd"));
        assert!(!constant_time_equals(b"abcd", b"abc"));
    }
}
