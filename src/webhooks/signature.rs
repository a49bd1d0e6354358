//! HMAC-SHA256 webhook signatures.
//!
//! The signed message is the timestamp header value immediately followed by
//! the raw body. Signatures travel as lowercase hex, optionally prefixed
//! with `sha256=`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

fn mac(key: &[u8], timestamp: &str, payload: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(payload);
    Some(mac)
}

/// Hex signature of `timestamp || payload`, without prefix.
pub fn compute_signature(key: &[u8], timestamp: &str, payload: &[u8]) -> String {
    mac(key, timestamp, payload)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Constant-time check of a presented signature.
pub fn verify_signature(key: &[u8], timestamp: &str, payload: &[u8], presented: &str) -> bool {
    let presented = presented.trim();
    let presented = presented.strip_prefix(PREFIX).unwrap_or(presented);
    let Ok(expected) = hex::decode(presented) else {
        return false;
    };
    match mac(key, timestamp, payload) {
        Some(mac) => mac.verify_slice(&expected).is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_signature_shape() {
        let sig = compute_signature(b"secret", "1700000000", b"{}");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_verify_accepts_prefixed_and_bare() {
        let sig = compute_signature(b"secret", "1700000000", b"{}");
        assert!(verify_signature(b"secret", "1700000000", b"{}", &sig));
        assert!(verify_signature(b"secret", "1700000000", b"{}", &format!("sha256={}", sig)));
    }

    #[test]
    fn test_timestamp_is_signed() {
        let sig = compute_signature(b"secret", "1700000000", b"{}");
        assert!(!verify_signature(b"secret", "1700000001", b"{}", &sig));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(!verify_signature(b"secret", "1", b"{}", "not-hex"));
        assert!(!verify_signature(b"secret", "1", b"{}", ""));
        assert!(!verify_signature(b"secret", "1", b"{}", &"0".repeat(64)));
    }

    proptest! {
        #[test]
        fn prop_wrong_key_fails(
            key in proptest::collection::vec(any::<u8>(), 1..64),
            payload in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let sig = compute_signature(&key, "1700000000", &payload);
            prop_assert!(verify_signature(&key, "1700000000", &payload, &sig));
            let mut other = key.clone();
            other[0] ^= 0xff;
            prop_assert!(!verify_signature(&other, "1700000000", &payload, &sig));
        }
    }
}
