//! Ed25519 key generation for token signing keys.

use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use zeroize::Zeroizing;

use super::CryptoError;

/// Freshly generated Ed25519 key pair.
pub struct GeneratedKeyPair {
    /// PKCS#8 v2 document holding the private key
    pub pkcs8: Zeroizing<Vec<u8>>,
    /// Raw 32-byte public key
    pub public: Vec<u8>,
}

pub fn generate_ed25519() -> Result<GeneratedKeyPair, CryptoError> {
    let rng = SystemRandom::new();
    let document = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| CryptoError::KeyGeneration)?;
    let pkcs8 = Zeroizing::new(document.as_ref().to_vec());
    let public = public_key_from_pkcs8(&pkcs8)?;
    Ok(GeneratedKeyPair { pkcs8, public })
}

/// Derive the raw public key, validating the PKCS#8 document on the way.
pub fn public_key_from_pkcs8(pkcs8: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let pair = Ed25519KeyPair::from_pkcs8(pkcs8)
        .map_err(|e| CryptoError::InvalidKey(format!("Ed25519 PKCS#8 rejected: {}", e)))?;
    Ok(pair.public_key().as_ref().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_public_key_matches_private() {
        let pair = generate_ed25519().unwrap();
        assert_eq!(pair.public.len(), 32);
        assert_eq!(public_key_from_pkcs8(&pair.pkcs8).unwrap(), pair.public);
    }

    #[test]
    fn test_two_generations_differ() {
        let a = generate_ed25519().unwrap();
        let b = generate_ed25519().unwrap();
        assert_ne!(a.public, b.public);
    }

    #[test]
    fn test_garbage_pkcs8_rejected() {
        assert!(public_key_from_pkcs8(&[1, 2, 3]).is_err());
    }
}
