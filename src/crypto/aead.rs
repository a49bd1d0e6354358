//! AES-256-GCM sealing.
//!
//! Used for the in-process secret cache and for the data-encryption keys
//! managed by the key rotation service. Every seal draws a fresh random
//! 96-bit nonce; callers bind ciphertext to its context through the AAD.

use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, error};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::CryptoError;

/// Size of AES-256-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of AES-256-GCM tag in bytes
const TAG_SIZE: usize = 16;

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_SIZE]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

/// A 256-bit symmetric key, zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey {
    bytes: [u8; KEY_SIZE],
}

impl AeadKey {
    /// Generate a new random key.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_SIZE];
        SystemRandom::new().fill(&mut bytes).map_err(|_| CryptoError::Rng)?;
        Ok(Self { bytes })
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, CryptoError> {
        if raw.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "AES-256 key must be {} bytes, got {}",
                KEY_SIZE,
                raw.len()
            )));
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(raw);
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encrypt plaintext, returning `(ciphertext_with_tag, nonce)`.
    pub fn seal(
        &self,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, [u8; NONCE_SIZE]), CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        SystemRandom::new().fill(&mut nonce_bytes).map_err(|_| {
            error!("Failed to generate random nonce");
            CryptoError::Rng
        })?;

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.bytes)
            .map_err(|_| CryptoError::InvalidKey("rejected by AES-256-GCM".to_string()))?;
        let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut ciphertext = plaintext.to_vec();
        ciphertext.reserve(TAG_SIZE);
        sealing_key
            .seal_in_place_append_tag(Aad::from(aad), &mut ciphertext)
            .map_err(|_| CryptoError::Seal)?;

        debug!(ciphertext_len = ciphertext.len(), "Sealed payload");
        Ok((ciphertext, nonce_bytes))
    }

    /// Decrypt and authenticate. Fails on any tampering, wrong key or wrong AAD.
    pub fn open(&self, ciphertext: &[u8], nonce: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonce(nonce.len()));
        }
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::Truncated);
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce);

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.bytes)
            .map_err(|_| CryptoError::InvalidKey("rejected by AES-256-GCM".to_string()))?;
        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut buffer = ciphertext.to_vec();
        let plaintext = opening_key.open_in_place(Aad::from(aad), &mut buffer).map_err(|_| {
            error!("Decryption failed - possible tampering or wrong key");
            CryptoError::Authentication
        })?;

        Ok(plaintext.to_vec())
    }
}

impl std::fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadKey").field("bytes", &"[REDACTED]").finish()
    }
}
