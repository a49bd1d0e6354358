//! Cryptographic primitives shared by the secret cache, the key rotation
//! service, refresh tokens and the webhook gate.

pub mod aead;
pub mod signing;

pub use aead::{AeadKey, KEY_SIZE, NONCE_SIZE};
pub use signing::{generate_ed25519, public_key_from_pkcs8, GeneratedKeyPair};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Failures of the primitives themselves. Callers decide how a failure maps
/// onto the crate error taxonomy (a failed open on the cache is corruption,
/// a failed open on caller ciphertext is bad input).
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("random number generation failed")]
    Rng,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid nonce length: expected {NONCE_SIZE} bytes, got {0}")]
    InvalidNonce(usize),

    #[error("ciphertext too short")]
    Truncated,

    #[error("authentication failed")]
    Authentication,

    #[error("encryption failed")]
    Seal,

    #[error("key generation failed")]
    KeyGeneration,
}

impl From<CryptoError> for crate::errors::Error {
    fn from(error: CryptoError) -> Self {
        crate::errors::Error::internal(error.to_string())
    }
}

/// `n` random bytes, base64url encoded without padding.
pub fn random_token(n: usize) -> Result<String, CryptoError> {
    let mut bytes = vec![0u8; n];
    SystemRandom::new().fill(&mut bytes).map_err(|_| CryptoError::Rng)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Constant-time byte comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
