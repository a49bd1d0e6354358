//! Key material and versioned key sets.
//!
//! Both key sets are immutable values. A rotation builds a new set from the
//! old one and the service swaps the published snapshot; nothing here is
//! mutated in place. Each set is persisted in the secret store as a JSON
//! document carrying its `version`, so nodes can tell whether a stored set
//! is newer than the one they hold.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::jwks::Jwk;
use crate::crypto::{self, AeadKey, NONCE_SIZE};
use crate::errors::{Error, Result};

pub const SIGNING_ALGORITHM: Algorithm = Algorithm::EdDSA;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Signing,
    Encryption,
}

impl KeyType {
    pub const ALL: [KeyType; 2] = [KeyType::Signing, KeyType::Encryption];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Signing => "signing",
            KeyType::Encryption => "encryption",
        }
    }
}

impl Display for KeyType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "signing" | "jwt" => Ok(KeyType::Signing),
            "encryption" | "aes" => Ok(KeyType::Encryption),
            other => Err(Error::validation_field(
                format!("Unknown key type '{}': expected signing or encryption", other),
                "key_type",
            )),
        }
    }
}

fn new_kid(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, now.format("%Y%m%d"), &suffix[..8])
}

// --------------------------------------------------------------------------
// Signing keys
// --------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningKeyStatus {
    Current,
    Next,
    Retired,
}

#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    pub status: SigningKeyStatus,
    pub created_at: DateTime<Utc>,
    /// When a `next` key becomes `current`
    pub promote_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
    /// End of a retired key's verification grace
    pub purge_at: Option<DateTime<Utc>>,
    public_key: Vec<u8>,
    pkcs8: Zeroizing<Vec<u8>>,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("status", &self.status)
            .field("created_at", &self.created_at)
            .field("promote_at", &self.promote_at)
            .field("purge_at", &self.purge_at)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    pub fn generate(status: SigningKeyStatus, now: DateTime<Utc>) -> Result<Self> {
        let pair = crypto::generate_ed25519()?;
        Self::from_pkcs8(new_kid("sig", now), pair.pkcs8, status, now)
    }

    fn from_pkcs8(
        kid: String,
        pkcs8: Zeroizing<Vec<u8>>,
        status: SigningKeyStatus,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let public_key = crypto::public_key_from_pkcs8(&pkcs8)?;
        Ok(Self {
            encoding: EncodingKey::from_ed_der(&pkcs8),
            decoding: DecodingKey::from_ed_der(&public_key),
            kid,
            status,
            created_at,
            promote_at: None,
            retired_at: None,
            purge_at: None,
            public_key,
            pkcs8,
        })
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    /// Whether tokens signed with this key may still be verified at `now`.
    pub fn verifies_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SigningKeyStatus::Current | SigningKeyStatus::Next => true,
            SigningKeyStatus::Retired => self.purge_at.is_some_and(|purge_at| now < purge_at),
        }
    }

    /// Sign and verify a check message through the same code path tokens use.
    pub fn self_check(&self) -> std::result::Result<(), String> {
        let message = format!("keywarden-integrity-check:{}", self.kid);
        let signature = jsonwebtoken::crypto::sign(message.as_bytes(), &self.encoding, SIGNING_ALGORITHM)
            .map_err(|e| format!("self-check signing failed: {}", e))?;
        match jsonwebtoken::crypto::verify(&signature, message.as_bytes(), &self.decoding, SIGNING_ALGORITHM) {
            Ok(true) => Ok(()),
            Ok(false) => Err("self-check signature did not verify".to_string()),
            Err(e) => Err(format!("self-check verification failed: {}", e)),
        }
    }

    pub fn to_jwk(&self) -> Jwk {
        Jwk::ed25519(&self.kid, &self.public_key)
    }

    fn to_document(&self) -> SigningKeyDocument {
        SigningKeyDocument {
            kid: self.kid.clone(),
            status: self.status,
            created_at: self.created_at,
            promote_at: self.promote_at,
            retired_at: self.retired_at,
            purge_at: self.purge_at,
            public_key: URL_SAFE_NO_PAD.encode(&self.public_key),
            private_key: Zeroizing::new(STANDARD.encode(self.pkcs8.as_slice())),
        }
    }

    fn from_document(doc: SigningKeyDocument) -> Result<Self> {
        let pkcs8 = Zeroizing::new(STANDARD.decode(doc.private_key.as_bytes()).map_err(|_| {
            Error::internal(format!("signing key '{}' has undecodable private material", doc.kid))
        })?);
        let mut key = Self::from_pkcs8(doc.kid, pkcs8, doc.status, doc.created_at)?;
        if URL_SAFE_NO_PAD.encode(&key.public_key) != doc.public_key {
            return Err(Error::internal(format!(
                "signing key '{}' public key does not match its private key",
                key.kid
            )));
        }
        key.promote_at = doc.promote_at;
        key.retired_at = doc.retired_at;
        key.purge_at = doc.purge_at;
        Ok(key)
    }
}

#[derive(Serialize, Deserialize)]
struct SigningKeyDocument {
    kid: String,
    status: SigningKeyStatus,
    created_at: DateTime<Utc>,
    promote_at: Option<DateTime<Utc>>,
    retired_at: Option<DateTime<Utc>>,
    purge_at: Option<DateTime<Utc>>,
    public_key: String,
    private_key: Zeroizing<String>,
}

#[derive(Serialize, Deserialize)]
struct SigningKeySetDocument {
    version: u64,
    algorithm: String,
    keys: Vec<SigningKeyDocument>,
}

/// Versioned signing keys: one `current`, at most one `next`, and any
/// number of `retired` keys still inside their verification grace.
#[derive(Debug, Clone)]
pub struct SigningKeySet {
    pub version: u64,
    keys: Vec<SigningKey>,
    current: usize,
    next: Option<usize>,
}

impl SigningKeySet {
    pub fn bootstrap(now: DateTime<Utc>) -> Result<Self> {
        let key = SigningKey::generate(SigningKeyStatus::Current, now)?;
        Ok(Self { version: 1, keys: vec![key], current: 0, next: None })
    }

    fn from_keys(version: u64, keys: Vec<SigningKey>) -> Result<Self> {
        let mut current = None;
        let mut next = None;
        for (index, key) in keys.iter().enumerate() {
            match key.status {
                SigningKeyStatus::Current if current.is_none() => current = Some(index),
                SigningKeyStatus::Next if next.is_none() => next = Some(index),
                SigningKeyStatus::Retired => {}
                status => {
                    return Err(Error::internal(format!(
                        "signing key set v{} has more than one {:?} key",
                        version, status
                    )))
                }
            }
        }
        let current = current.ok_or_else(|| {
            Error::internal(format!("signing key set v{} has no current key", version))
        })?;
        Ok(Self { version, keys, current, next })
    }

    pub fn current(&self) -> &SigningKey {
        &self.keys[self.current]
    }

    pub fn next(&self) -> Option<&SigningKey> {
        self.next.map(|index| &self.keys[index])
    }

    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    pub fn retired(&self) -> impl Iterator<Item = &SigningKey> {
        self.keys.iter().filter(|k| k.status == SigningKeyStatus::Retired)
    }

    /// Key able to verify a token carrying `kid` at `now`.
    pub fn verification_key(&self, kid: &str, now: DateTime<Utc>) -> Option<&SigningKey> {
        self.keys.iter().find(|k| k.kid == kid && k.verifies_at(now))
    }

    /// Keys published in the JWKS at `now`.
    pub fn published(&self, now: DateTime<Utc>) -> impl Iterator<Item = &SigningKey> {
        self.keys.iter().filter(move |k| k.verifies_at(now))
    }

    pub fn promotion_due(&self, now: DateTime<Utc>) -> bool {
        self.next().and_then(|k| k.promote_at).is_some_and(|at| at <= now)
    }

    pub fn purge_due(&self, now: DateTime<Utc>) -> bool {
        self.retired().any(|k| !k.verifies_at(now))
    }

    /// Stage `next` for publication until `promote_at`.
    pub fn with_next(&self, mut next: SigningKey, promote_at: DateTime<Utc>) -> Result<Self> {
        if self.next.is_some() {
            return Err(Error::internal("a next signing key is already staged"));
        }
        next.status = SigningKeyStatus::Next;
        next.promote_at = Some(promote_at);
        let mut keys = self.keys.clone();
        keys.push(next);
        Self::from_keys(self.version + 1, keys)
    }

    /// Promote `next` to `current` and retire the old current key until
    /// `now + grace`. `None` when nothing is staged.
    pub fn promoted(&self, now: DateTime<Utc>, grace: Duration) -> Option<Self> {
        let next = self.next?;
        let mut keys = self.keys.clone();

        let old = &mut keys[self.current];
        old.status = SigningKeyStatus::Retired;
        old.retired_at = Some(now);
        old.purge_at = Some(now + grace);

        let new = &mut keys[next];
        new.status = SigningKeyStatus::Current;
        new.promote_at = None;

        Some(Self { version: self.version + 1, keys, current: next, next: None })
    }

    /// Drop retired keys whose grace ended. Returns the new set and the
    /// purged kids, or `None` when nothing is due.
    pub fn purged(&self, now: DateTime<Utc>) -> Option<(Self, Vec<String>)> {
        let (kept, dropped): (Vec<_>, Vec<_>) =
            self.keys.iter().cloned().partition(|k| k.verifies_at(now));
        if dropped.is_empty() {
            return None;
        }
        let purged = dropped.into_iter().map(|k| k.kid).collect();
        Self::from_keys(self.version + 1, kept).ok().map(|set| (set, purged))
    }

    pub fn to_json(&self) -> Result<String> {
        let document = SigningKeySetDocument {
            version: self.version,
            algorithm: "EdDSA".to_string(),
            keys: self.keys.iter().map(SigningKey::to_document).collect(),
        };
        Ok(serde_json::to_string(&document)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let document: SigningKeySetDocument = serde_json::from_str(json)?;
        if document.algorithm != "EdDSA" {
            return Err(Error::internal(format!(
                "unsupported signing algorithm '{}'",
                document.algorithm
            )));
        }
        let keys = document
            .keys
            .into_iter()
            .map(SigningKey::from_document)
            .collect::<Result<Vec<_>>>()?;
        Self::from_keys(document.version, keys)
    }
}

// --------------------------------------------------------------------------
// Encryption keys
// --------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EncryptionKey {
    pub kid: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
    /// Retired keys are purged from the ring after this instant; until
    /// then they still decrypt
    pub purge_after: Option<DateTime<Utc>>,
    key: AeadKey,
}

impl EncryptionKey {
    pub fn generate(now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            kid: new_kid("enc", now),
            active: true,
            created_at: now,
            retired_at: None,
            purge_after: None,
            key: AeadKey::generate()?,
        })
    }

    fn purge_due_at(&self, now: DateTime<Utc>) -> bool {
        !self.active && self.purge_after.is_some_and(|at| now >= at)
    }
}

#[derive(Serialize, Deserialize)]
struct EncryptionKeyDocument {
    kid: String,
    active: bool,
    created_at: DateTime<Utc>,
    retired_at: Option<DateTime<Utc>>,
    purge_after: Option<DateTime<Utc>>,
    key: Zeroizing<String>,
}

#[derive(Serialize, Deserialize)]
struct EncryptionKeyRingDocument {
    version: u64,
    active_kid: String,
    keys: Vec<EncryptionKeyDocument>,
}

/// Ciphertext addressed by the kid of the key that sealed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub kid: String,
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

/// Versioned encryption keys with exactly one active key.
#[derive(Debug, Clone)]
pub struct EncryptionKeyRing {
    pub version: u64,
    active: usize,
    keys: Vec<EncryptionKey>,
}

impl EncryptionKeyRing {
    pub fn bootstrap(now: DateTime<Utc>) -> Result<Self> {
        Ok(Self { version: 1, active: 0, keys: vec![EncryptionKey::generate(now)?] })
    }

    fn from_keys(version: u64, keys: Vec<EncryptionKey>) -> Result<Self> {
        let mut active = keys.iter().enumerate().filter(|(_, k)| k.active).map(|(i, _)| i);
        match (active.next(), active.next()) {
            (Some(index), None) => Ok(Self { version, active: index, keys }),
            _ => Err(Error::internal(format!(
                "encryption key ring v{} must have exactly one active key",
                version
            ))),
        }
    }

    pub fn active(&self) -> &EncryptionKey {
        &self.keys[self.active]
    }

    pub fn active_kid(&self) -> &str {
        &self.active().kid
    }

    pub fn keys(&self) -> &[EncryptionKey] {
        &self.keys
    }

    /// Activate `new`, keeping every other key decryptable until
    /// `now + overlap`.
    pub fn rotated(&self, mut new: EncryptionKey, now: DateTime<Utc>, overlap: Duration) -> Result<Self> {
        let mut keys = self.keys.clone();
        for key in keys.iter_mut().filter(|k| k.active) {
            key.active = false;
            key.retired_at = Some(now);
            key.purge_after = Some(now + overlap);
        }
        new.active = true;
        keys.push(new);
        Self::from_keys(self.version + 1, keys)
    }

    pub fn purge_due(&self, now: DateTime<Utc>) -> bool {
        self.keys.iter().any(|k| k.purge_due_at(now))
    }

    pub fn purged(&self, now: DateTime<Utc>) -> Option<(Self, Vec<String>)> {
        let (kept, dropped): (Vec<_>, Vec<_>) =
            self.keys.iter().cloned().partition(|k| !k.purge_due_at(now));
        if dropped.is_empty() {
            return None;
        }
        let purged = dropped.into_iter().map(|k| k.kid).collect();
        Self::from_keys(self.version + 1, kept).ok().map(|ring| (ring, purged))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob> {
        let key = self.active();
        let (ciphertext, nonce) = key.key.seal(plaintext, key.kid.as_bytes())?;
        Ok(EncryptedBlob { kid: key.kid.clone(), nonce, ciphertext })
    }

    /// Any key still in the ring decrypts, whether or not its purge is due.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>> {
        let key = self
            .keys
            .iter()
            .find(|k| k.kid == blob.kid)
            .ok_or_else(|| Error::not_found("encryption key", blob.kid.as_str()))?;
        key.key
            .open(&blob.ciphertext, &blob.nonce, key.kid.as_bytes())
            .map_err(|e| Error::validation(format!("ciphertext rejected: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        let document = EncryptionKeyRingDocument {
            version: self.version,
            active_kid: self.active_kid().to_string(),
            keys: self
                .keys
                .iter()
                .map(|k| EncryptionKeyDocument {
                    kid: k.kid.clone(),
                    active: k.active,
                    created_at: k.created_at,
                    retired_at: k.retired_at,
                    purge_after: k.purge_after,
                    key: Zeroizing::new(STANDARD.encode(k.key.as_bytes())),
                })
                .collect(),
        };
        Ok(serde_json::to_string(&document)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let document: EncryptionKeyRingDocument = serde_json::from_str(json)?;
        let keys = document
            .keys
            .into_iter()
            .map(|doc| {
                let raw = Zeroizing::new(STANDARD.decode(doc.key.as_bytes()).map_err(|_| {
                    Error::internal(format!("encryption key '{}' is not valid base64", doc.kid))
                })?);
                Ok(EncryptionKey {
                    key: AeadKey::from_slice(&raw)?,
                    kid: doc.kid,
                    active: doc.active,
                    created_at: doc.created_at,
                    retired_at: doc.retired_at,
                    purge_after: doc.purge_after,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let ring = Self::from_keys(document.version, keys)?;
        if ring.active_kid() != document.active_kid {
            return Err(Error::internal("encryption key ring active_kid disagrees with its keys"));
        }
        Ok(ring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_type_parse() {
        assert_eq!("signing".parse::<KeyType>().unwrap(), KeyType::Signing);
        assert_eq!("AES".parse::<KeyType>().unwrap(), KeyType::Encryption);
        assert!("rsa".parse::<KeyType>().is_err());
    }

    #[test]
    fn test_signing_set_lifecycle() {
        let t0 = Utc::now();
        let set = SigningKeySet::bootstrap(t0).unwrap();
        let old_kid = set.current().kid.clone();
        assert!(set.current().self_check().is_ok());

        let next = SigningKey::generate(SigningKeyStatus::Next, t0).unwrap();
        let staged = set.with_next(next, t0 + Duration::minutes(20)).unwrap();
        assert_eq!(staged.version, 2);
        assert_eq!(staged.published(t0).count(), 2);
        assert!(!staged.promotion_due(t0 + Duration::minutes(10)));
        assert!(staged.promotion_due(t0 + Duration::minutes(20)));
        assert!(staged.with_next(SigningKey::generate(SigningKeyStatus::Next, t0).unwrap(), t0).is_err());

        let t1 = t0 + Duration::minutes(20);
        let promoted = staged.promoted(t1, Duration::minutes(30)).unwrap();
        assert_ne!(promoted.current().kid, old_kid);
        assert!(promoted.next().is_none());
        assert!(promoted.verification_key(&old_kid, t1 + Duration::minutes(29)).is_some());
        assert!(promoted.verification_key(&old_kid, t1 + Duration::minutes(30)).is_none());

        let (purged, kids) = promoted.purged(t1 + Duration::minutes(30)).unwrap();
        assert_eq!(kids, vec![old_kid]);
        assert_eq!(purged.keys().len(), 1);
        assert!(purged.purged(t1 + Duration::minutes(30)).is_none());
    }

    #[test]
    fn test_signing_set_json_roundtrip_keeps_material() {
        let t0 = Utc::now();
        let set = SigningKeySet::bootstrap(t0).unwrap();
        let restored = SigningKeySet::from_json(&set.to_json().unwrap()).unwrap();
        assert_eq!(restored.version, set.version);
        assert_eq!(restored.current().kid, set.current().kid);
        assert_eq!(restored.current().public_key(), set.current().public_key());
        assert!(restored.current().self_check().is_ok());
    }

    #[test]
    fn test_tampered_public_key_rejected() {
        let set = SigningKeySet::bootstrap(Utc::now()).unwrap();
        let other = SigningKeySet::bootstrap(Utc::now()).unwrap();
        let mut doc: serde_json::Value = serde_json::from_str(&set.to_json().unwrap()).unwrap();
        doc["keys"][0]["public_key"] = serde_json::Value::String(URL_SAFE_NO_PAD.encode(other.current().public_key()));
        assert!(SigningKeySet::from_json(&doc.to_string()).is_err());
    }

    #[test]
    fn test_encryption_ring_overlap() {
        let t0 = Utc::now();
        let ring = EncryptionKeyRing::bootstrap(t0).unwrap();
        let old_blob = ring.encrypt(b"journal entry").unwrap();

        let rotated = ring.rotated(EncryptionKey::generate(t0).unwrap(), t0, Duration::hours(48)).unwrap();
        assert_ne!(rotated.active_kid(), ring.active_kid());
        assert_eq!(rotated.decrypt(&old_blob).unwrap(), b"journal entry");

        let new_blob = rotated.encrypt(b"fresh").unwrap();
        assert_eq!(new_blob.kid, rotated.active_kid());

        let later = t0 + Duration::hours(48);
        assert!(rotated.purge_due(later));
        assert_eq!(rotated.decrypt(&old_blob).unwrap(), b"journal entry", "decrypts until purged");
        let (purged, kids) = rotated.purged(later).unwrap();
        assert_eq!(kids, vec![ring.active_kid().to_string()]);
        assert!(purged.decrypt(&old_blob).is_err());
        assert_eq!(purged.decrypt(&new_blob).unwrap(), b"fresh");
    }

    #[test]
    fn test_encryption_ring_json_roundtrip() {
        let ring = EncryptionKeyRing::bootstrap(Utc::now()).unwrap();
        let blob = ring.encrypt(b"x").unwrap();
        let restored = EncryptionKeyRing::from_json(&ring.to_json().unwrap()).unwrap();
        assert_eq!(restored.decrypt(&blob).unwrap(), b"x");
    }

    #[test]
    fn test_tampered_blob_rejected() {
        let ring = EncryptionKeyRing::bootstrap(Utc::now()).unwrap();
        let mut blob = ring.encrypt(b"secret").unwrap();
        blob.ciphertext[0] ^= 1;
        assert!(ring.decrypt(&blob).is_err());
    }
}
