//! Key rotation service.
//!
//! Owns the signing key set and the encryption key ring. Readers take an
//! `Arc` snapshot and never block on rotation; writers build a new set from
//! the latest persisted one while holding the per-key-type rotation lock,
//! persist it through the secrets client, verify the write, and only then
//! swap the snapshot. A rotation that fails anywhere before the swap leaves
//! the published keys untouched.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use super::jwks::Jwks;
use super::lock::{LockLease, RotationLock};
use super::types::{
    EncryptedBlob, EncryptionKey, EncryptionKeyRing, KeyType, SigningKey, SigningKeySet,
    SigningKeyStatus,
};
use crate::clock::SharedClock;
use crate::config::{RotationConfig, SecretsConfig, TokenConfig};
use crate::errors::{Error, Result};
use crate::monitor::{SecurityEventKind, SecurityLog};
use crate::observability::metrics;
use crate::secrets::{SecretString, SecretsClient, SecretsError};

#[derive(Debug, Clone)]
pub struct KeyRotationSettings {
    pub signing_path: String,
    pub encryption_path: String,
    /// How long a staged signing key is published before it signs
    pub signing_overlap: Duration,
    /// How long a replaced encryption key still decrypts
    pub encryption_overlap: Duration,
    /// How long a retired signing key still verifies
    pub signing_grace: Duration,
    pub signing_interval: Duration,
    pub encryption_interval: Duration,
    pub lock_timeout: StdDuration,
}

impl KeyRotationSettings {
    pub fn from_config(secrets: &SecretsConfig, rotation: &RotationConfig, tokens: &TokenConfig) -> Self {
        Self {
            signing_path: secrets.signing_keys_path.clone(),
            encryption_path: secrets.encryption_keys_path.clone(),
            signing_overlap: rotation.signing_overlap(),
            encryption_overlap: rotation.encryption_overlap(),
            signing_grace: tokens.longest_signed_ttl() + tokens.clock_skew(),
            signing_interval: rotation.signing_interval(),
            encryption_interval: rotation.encryption_interval(),
            lock_timeout: rotation.lock_timeout(),
        }
    }
}

/// Broadcast to the external re-encryption job and any other listener.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum KeyRotationNotice {
    SigningKeyStaged { kid: String, promote_at: DateTime<Utc> },
    SigningKeyPromoted { kid: String, retired_kid: String },
    SigningKeyPurged { kid: String },
    EncryptionKeyActivated { kid: String, previous_kid: String, decrypt_until: DateTime<Utc> },
    EncryptionKeyPurged { kid: String },
    KeysReloaded { key_type: KeyType, version: u64 },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationOutcome {
    pub key_type: KeyType,
    pub version: u64,
    pub kid: String,
    pub previous_kid: String,
    /// When the new key starts being used for signing or encryption
    pub effective_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStatus {
    pub key_type: KeyType,
    pub version: u64,
    pub active_kid: String,
    pub pending_kid: Option<String>,
    pub last_rotated_at: DateTime<Utc>,
    pub age_seconds: i64,
    pub retained_keys: usize,
}

/// Key sets that can be persisted as a versioned document.
trait KeySetDocument: Sized {
    const KEY_TYPE: KeyType;
    fn version(&self) -> u64;
    fn encode(&self) -> Result<String>;
    fn decode(json: &str) -> Result<Self>;
    fn generate(now: DateTime<Utc>) -> Result<Self>;
    fn slot(service: &KeyRotationService) -> &RwLock<Arc<Self>>;
    fn path(settings: &KeyRotationSettings) -> &str;
}

impl KeySetDocument for SigningKeySet {
    const KEY_TYPE: KeyType = KeyType::Signing;

    fn version(&self) -> u64 {
        self.version
    }
    fn encode(&self) -> Result<String> {
        self.to_json()
    }
    fn decode(json: &str) -> Result<Self> {
        Self::from_json(json)
    }
    fn generate(now: DateTime<Utc>) -> Result<Self> {
        Self::bootstrap(now)
    }
    fn slot(service: &KeyRotationService) -> &RwLock<Arc<Self>> {
        &service.signing
    }
    fn path(settings: &KeyRotationSettings) -> &str {
        &settings.signing_path
    }
}

impl KeySetDocument for EncryptionKeyRing {
    const KEY_TYPE: KeyType = KeyType::Encryption;

    fn version(&self) -> u64 {
        self.version
    }
    fn encode(&self) -> Result<String> {
        self.to_json()
    }
    fn decode(json: &str) -> Result<Self> {
        Self::from_json(json)
    }
    fn generate(now: DateTime<Utc>) -> Result<Self> {
        Self::bootstrap(now)
    }
    fn slot(service: &KeyRotationService) -> &RwLock<Arc<Self>> {
        &service.encryption
    }
    fn path(settings: &KeyRotationSettings) -> &str {
        &settings.encryption_path
    }
}

pub struct KeyRotationService {
    secrets: Arc<SecretsClient>,
    lock: Arc<dyn RotationLock>,
    clock: SharedClock,
    events: SecurityLog,
    settings: KeyRotationSettings,
    signing: RwLock<Arc<SigningKeySet>>,
    encryption: RwLock<Arc<EncryptionKeyRing>>,
    notices: broadcast::Sender<KeyRotationNotice>,
}

impl std::fmt::Debug for KeyRotationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRotationService")
            .field("signing_version", &self.signing_keys().version)
            .field("encryption_version", &self.encryption_keys().version)
            .finish_non_exhaustive()
    }
}

impl KeyRotationService {
    /// Load both key sets from the secret store, creating any that do not
    /// exist yet.
    pub async fn initialize(
        secrets: Arc<SecretsClient>,
        lock: Arc<dyn RotationLock>,
        clock: SharedClock,
        events: SecurityLog,
        settings: KeyRotationSettings,
    ) -> Result<Self> {
        let now = clock.now();
        let (notices, _) = broadcast::channel(64);
        let service = Self {
            secrets,
            lock,
            clock,
            events,
            settings,
            signing: RwLock::new(Arc::new(SigningKeySet::bootstrap(now)?)),
            encryption: RwLock::new(Arc::new(EncryptionKeyRing::bootstrap(now)?)),
            notices,
        };

        let signing = service.load_or_create::<SigningKeySet>().await?;
        install(&service.signing, signing);
        let encryption = service.load_or_create::<EncryptionKeyRing>().await?;
        install(&service.encryption, encryption);

        info!(
            signing_kid = %service.signing_keys().current().kid,
            encryption_kid = %service.encryption_keys().active_kid(),
            "Key rotation service initialized"
        );
        Ok(service)
    }

    /// Current signing key set snapshot.
    pub fn signing_keys(&self) -> Arc<SigningKeySet> {
        snapshot(&self.signing)
    }

    pub fn encryption_keys(&self) -> Arc<EncryptionKeyRing> {
        snapshot(&self.encryption)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Public keys able to verify any token still in circulation: the
    /// current key, the staged next key and retired keys inside their grace.
    pub fn get_jwks(&self) -> Jwks {
        let now = self.clock.now();
        Jwks { keys: self.signing_keys().published(now).map(SigningKey::to_jwk).collect() }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob> {
        self.encryption_keys().encrypt(plaintext)
    }

    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>> {
        self.encryption_keys().decrypt(blob)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KeyRotationNotice> {
        self.notices.subscribe()
    }

    pub fn status(&self) -> Vec<KeyStatus> {
        let now = self.clock.now();
        let signing = self.signing_keys();
        let encryption = self.encryption_keys();
        vec![
            KeyStatus {
                key_type: KeyType::Signing,
                version: signing.version,
                active_kid: signing.current().kid.clone(),
                pending_kid: signing.next().map(|k| k.kid.clone()),
                last_rotated_at: signing.current().created_at,
                age_seconds: (now - signing.current().created_at).num_seconds(),
                retained_keys: signing.keys().len(),
            },
            KeyStatus {
                key_type: KeyType::Encryption,
                version: encryption.version,
                active_kid: encryption.active_kid().to_string(),
                pending_kid: None,
                last_rotated_at: encryption.active().created_at,
                age_seconds: (now - encryption.active().created_at).num_seconds(),
                retained_keys: encryption.keys().len(),
            },
        ]
    }

    /// Rotate one key type.
    ///
    /// Signing: a new key is staged as `next` and published next to the
    /// current key for the overlap window; the scheduler promotes it when
    /// the window ends. While a staged key is still inside its window the
    /// rotation is refused with `RotationConflict`; once the window has
    /// ended the staged key is promoted first.
    ///
    /// Encryption: a new key becomes active immediately; the previous key
    /// keeps decrypting for the overlap window.
    #[instrument(skip(self), fields(key_type = %key_type))]
    pub async fn rotate(&self, key_type: KeyType) -> Result<RotationOutcome> {
        let lease = self.acquire_lock(key_type, true).await?;
        let result = match key_type {
            KeyType::Signing => self.rotate_signing_locked().await,
            KeyType::Encryption => self.rotate_encryption_locked().await,
        };
        self.release_lock(&lease).await;

        match &result {
            Ok(outcome) => {
                metrics::record_rotation(key_type.as_str(), "success");
                info!(kid = %outcome.kid, version = outcome.version, "Key rotation committed");
            }
            Err(Error::RotationIntegrityFailure { .. }) => {}
            Err(e @ Error::RotationConflict { .. }) => {
                metrics::record_rotation(key_type.as_str(), "conflict");
                warn!(error = %e, "Key rotation refused");
            }
            Err(e) => {
                metrics::record_rotation(key_type.as_str(), "failed");
                self.events.record_kind(
                    SecurityEventKind::RotationFailed,
                    [("key_type", key_type.to_string()), ("error", e.to_string())],
                );
            }
        }
        result
    }

    /// Adopt a newer persisted key set, e.g. after a change notification.
    /// Returns whether the local snapshot changed.
    #[instrument(skip(self), fields(key_type = %key_type))]
    pub async fn reload(&self, key_type: KeyType) -> Result<bool> {
        let version = match key_type {
            KeyType::Signing => self.adopt_latest::<SigningKeySet>().await?,
            KeyType::Encryption => self.adopt_latest::<EncryptionKeyRing>().await?,
        };
        match version {
            Some(version) => {
                self.events.record_kind(
                    SecurityEventKind::KeysReloaded,
                    [("key_type", key_type.to_string()), ("version", version.to_string())],
                );
                self.announce(KeyRotationNotice::KeysReloaded { key_type, version });
                Ok(true)
            }
            None => {
                debug!("Persisted key set is not newer than the local snapshot");
                Ok(false)
            }
        }
    }

    /// Promote, purge and rotate whatever is due. Idempotent: every decision
    /// derives from timestamps stored with the keys. Returns the key types
    /// whose sets changed.
    pub async fn run_maintenance(&self) -> Result<Vec<KeyType>> {
        let mut changed = Vec::new();
        for key_type in KeyType::ALL {
            if !self.maintenance_due(key_type) {
                continue;
            }
            let Some(lease) = self.acquire_lock(key_type, false).await.ok() else {
                debug!(key_type = %key_type, "Rotation lock busy; maintenance deferred");
                continue;
            };
            let result = match key_type {
                KeyType::Signing => self.maintain_signing_locked().await,
                KeyType::Encryption => self.maintain_encryption_locked().await,
            };
            self.release_lock(&lease).await;
            if result? {
                changed.push(key_type);
            }
        }
        Ok(changed)
    }

    fn maintenance_due(&self, key_type: KeyType) -> bool {
        let now = self.clock.now();
        match key_type {
            KeyType::Signing => {
                let keys = self.signing_keys();
                keys.promotion_due(now)
                    || keys.purge_due(now)
                    || (keys.next().is_none()
                        && keys.current().created_at + self.settings.signing_interval <= now)
            }
            KeyType::Encryption => {
                let keys = self.encryption_keys();
                keys.purge_due(now)
                    || keys.active().created_at + self.settings.encryption_interval <= now
            }
        }
    }

    async fn rotate_signing_locked(&self) -> Result<RotationOutcome> {
        let now = self.clock.now();
        let base = self.latest::<SigningKeySet>().await?;

        let mut working = (*base).clone();
        let mut promoted = None;
        if let Some(next) = working.next() {
            if !working.promotion_due(now) {
                let promote_at = next.promote_at.map_or_else(|| "unknown".to_string(), |at| at.to_rfc3339());
                return Err(Error::rotation_conflict(
                    KeyType::Signing.as_str(),
                    format!("key '{}' is staged and promotes at {}", next.kid, promote_at),
                ));
            }
            let retired_kid = working.current().kid.clone();
            if let Some(set) = working.promoted(now, self.settings.signing_grace) {
                working = set;
                promoted = Some((working.current().kid.clone(), retired_kid));
            }
        }

        let candidate = self.checked_signing_key(now, working.version + 1)?;
        let promote_at = now + self.settings.signing_overlap;
        let previous_kid = working.current().kid.clone();
        let kid = candidate.kid.clone();
        let staged = working.with_next(candidate, promote_at)?;

        self.persist_verified(&*base, &staged).await?;
        let version = staged.version;
        install(&self.signing, Arc::new(staged));

        if let Some((kid, retired_kid)) = promoted {
            self.record_promotion(kid, retired_kid);
        }
        self.events.record_kind(
            SecurityEventKind::KeyRotated,
            [
                ("key_type", KeyType::Signing.to_string()),
                ("kid", kid.clone()),
                ("previous_kid", previous_kid.clone()),
                ("version", version.to_string()),
                ("promote_at", promote_at.to_rfc3339()),
            ],
        );
        self.announce(KeyRotationNotice::SigningKeyStaged { kid: kid.clone(), promote_at });

        Ok(RotationOutcome {
            key_type: KeyType::Signing,
            version,
            kid,
            previous_kid,
            effective_at: promote_at,
        })
    }

    async fn rotate_encryption_locked(&self) -> Result<RotationOutcome> {
        let now = self.clock.now();
        let base = self.latest::<EncryptionKeyRing>().await?;
        let previous_kid = base.active_kid().to_string();

        let rotated = base.rotated(EncryptionKey::generate(now)?, now, self.settings.encryption_overlap)?;
        let kid = rotated.active_kid().to_string();
        self.persist_verified(&*base, &rotated).await?;
        let version = rotated.version;
        install(&self.encryption, Arc::new(rotated));

        let decrypt_until = now + self.settings.encryption_overlap;
        self.events.record_kind(
            SecurityEventKind::KeyRotated,
            [
                ("key_type", KeyType::Encryption.to_string()),
                ("kid", kid.clone()),
                ("previous_kid", previous_kid.clone()),
                ("version", version.to_string()),
            ],
        );
        self.announce(KeyRotationNotice::EncryptionKeyActivated {
            kid: kid.clone(),
            previous_kid: previous_kid.clone(),
            decrypt_until,
        });

        Ok(RotationOutcome { key_type: KeyType::Encryption, version, kid, previous_kid, effective_at: now })
    }

    async fn maintain_signing_locked(&self) -> Result<bool> {
        let now = self.clock.now();
        let base = self.latest::<SigningKeySet>().await?;
        let mut working = (*base).clone();
        let mut promoted = None;
        let mut purged = Vec::new();
        let mut staged = None;

        if working.promotion_due(now) {
            let retired_kid = working.current().kid.clone();
            if let Some(set) = working.promoted(now, self.settings.signing_grace) {
                working = set;
                promoted = Some((working.current().kid.clone(), retired_kid));
            }
        }
        if let Some((set, kids)) = working.purged(now) {
            working = set;
            purged = kids;
        }
        if working.next().is_none()
            && working.current().created_at + self.settings.signing_interval <= now
        {
            let candidate = self.checked_signing_key(now, working.version + 1)?;
            let promote_at = now + self.settings.signing_overlap;
            staged = Some((candidate.kid.clone(), promote_at));
            working = working.with_next(candidate, promote_at)?;
        }

        if working.version == base.version {
            return Ok(false);
        }
        self.persist_verified(&*base, &working).await?;
        install(&self.signing, Arc::new(working));

        if let Some((kid, retired_kid)) = promoted {
            self.record_promotion(kid, retired_kid);
        }
        for kid in purged {
            self.events.record_kind(
                SecurityEventKind::KeyPurged,
                [("key_type", KeyType::Signing.to_string()), ("kid", kid.clone())],
            );
            self.announce(KeyRotationNotice::SigningKeyPurged { kid });
        }
        if let Some((kid, promote_at)) = staged {
            metrics::record_rotation(KeyType::Signing.as_str(), "scheduled");
            self.events.record_kind(
                SecurityEventKind::KeyRotated,
                [
                    ("key_type", KeyType::Signing.to_string()),
                    ("kid", kid.clone()),
                    ("trigger", "schedule".to_string()),
                ],
            );
            self.announce(KeyRotationNotice::SigningKeyStaged { kid, promote_at });
        }
        Ok(true)
    }

    async fn maintain_encryption_locked(&self) -> Result<bool> {
        let now = self.clock.now();
        let base = self.latest::<EncryptionKeyRing>().await?;
        let mut working = (*base).clone();
        let mut purged = Vec::new();
        let mut activated = None;

        if let Some((ring, kids)) = working.purged(now) {
            working = ring;
            purged = kids;
        }
        if working.active().created_at + self.settings.encryption_interval <= now {
            let previous_kid = working.active_kid().to_string();
            working = working.rotated(EncryptionKey::generate(now)?, now, self.settings.encryption_overlap)?;
            activated = Some((working.active_kid().to_string(), previous_kid));
        }

        if working.version == base.version {
            return Ok(false);
        }
        self.persist_verified(&*base, &working).await?;
        install(&self.encryption, Arc::new(working));

        for kid in purged {
            self.events.record_kind(
                SecurityEventKind::KeyPurged,
                [("key_type", KeyType::Encryption.to_string()), ("kid", kid.clone())],
            );
            self.announce(KeyRotationNotice::EncryptionKeyPurged { kid });
        }
        if let Some((kid, previous_kid)) = activated {
            metrics::record_rotation(KeyType::Encryption.as_str(), "scheduled");
            self.events.record_kind(
                SecurityEventKind::KeyRotated,
                [
                    ("key_type", KeyType::Encryption.to_string()),
                    ("kid", kid.clone()),
                    ("trigger", "schedule".to_string()),
                ],
            );
            self.announce(KeyRotationNotice::EncryptionKeyActivated {
                kid,
                previous_kid,
                decrypt_until: now + self.settings.encryption_overlap,
            });
        }
        Ok(true)
    }

    fn checked_signing_key(&self, now: DateTime<Utc>, version: u64) -> Result<SigningKey> {
        let candidate = SigningKey::generate(SigningKeyStatus::Next, now)?;
        candidate
            .self_check()
            .map_err(|reason| self.integrity_failure(KeyType::Signing, version, reason))?;
        Ok(candidate)
    }

    fn record_promotion(&self, kid: String, retired_kid: String) {
        self.events.record_kind(
            SecurityEventKind::KeyPromoted,
            [
                ("key_type", KeyType::Signing.to_string()),
                ("kid", kid.clone()),
                ("retired_kid", retired_kid.clone()),
                ("verify_until", (self.clock.now() + self.settings.signing_grace).to_rfc3339()),
            ],
        );
        self.announce(KeyRotationNotice::SigningKeyPromoted { kid, retired_kid });
    }

    fn announce(&self, notice: KeyRotationNotice) {
        // No receivers is fine.
        let _ = self.notices.send(notice);
    }

    fn integrity_failure(&self, key_type: KeyType, version: u64, reason: String) -> Error {
        metrics::record_rotation(key_type.as_str(), "integrity_failure");
        self.events.record_kind(
            SecurityEventKind::RotationIntegrityFailure,
            [
                ("key_type", key_type.to_string()),
                ("version", version.to_string()),
                ("reason", reason.clone()),
            ],
        );
        Error::integrity(key_type.as_str(), reason)
    }

    async fn acquire_lock(&self, key_type: KeyType, report_timeout: bool) -> Result<LockLease> {
        let timeout = self.settings.lock_timeout;
        match self.lock.acquire(key_type, timeout).await? {
            Some(lease) => Ok(lease),
            None => {
                let waited_ms = timeout.as_millis() as u64;
                if report_timeout {
                    metrics::record_rotation(key_type.as_str(), "lock_timeout");
                    self.events.record_kind(
                        SecurityEventKind::RotationLockTimeout,
                        [("key_type", key_type.to_string()), ("waited_ms", waited_ms.to_string())],
                    );
                }
                Err(Error::RotationLockTimeout { key_type: key_type.to_string(), waited_ms })
            }
        }
    }

    async fn release_lock(&self, lease: &LockLease) {
        if let Err(e) = self.lock.release(lease).await {
            // The lease expires on its own.
            warn!(key_type = %lease.key_type, error = %e, "Failed to release rotation lock");
        }
    }

    /// Read the persisted key set, creating and persisting one if absent.
    async fn load_or_create<K: KeySetDocument>(&self) -> Result<Arc<K>> {
        let path = K::path(&self.settings);
        match self.secrets.get(path).await {
            Ok(json) => return Ok(Arc::new(K::decode(json.expose_secret())?)),
            Err(SecretsError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let lease = self.acquire_lock(K::KEY_TYPE, true).await?;
        let result = async {
            // Another node may have created it while we waited.
            match self.secrets.refresh(path).await {
                Ok(json) => return Ok(Arc::new(K::decode(json.expose_secret())?)),
                Err(SecretsError::NotFound { .. }) => {}
                Err(e) => return Err(Error::from(e)),
            }
            let created = K::generate(self.clock.now())?;
            self.persist_written(&created).await?;
            info!(key_type = %K::KEY_TYPE, "Created initial key set");
            Ok(Arc::new(created))
        }
        .await;
        self.release_lock(&lease).await;
        result
    }

    /// Newest of the local snapshot and the persisted set; installs the
    /// persisted set when it is newer.
    async fn latest<K: KeySetDocument>(&self) -> Result<Arc<K>> {
        self.adopt_latest::<K>().await?;
        Ok(snapshot(K::slot(self)))
    }

    /// Install the persisted set if newer; returns its version when adopted.
    async fn adopt_latest<K: KeySetDocument>(&self) -> Result<Option<u64>> {
        let held = snapshot(K::slot(self));
        let json = self.secrets.refresh(K::path(&self.settings)).await?;
        let stored = K::decode(json.expose_secret())?;
        if stored.version() > held.version() {
            let version = stored.version();
            install(K::slot(self), Arc::new(stored));
            info!(key_type = %K::KEY_TYPE, version, "Adopted newer persisted key set");
            Ok(Some(version))
        } else {
            Ok(None)
        }
    }

    /// Persist `next`, then confirm the cache and the store both hold
    /// exactly what was written. On mismatch the previous set is written
    /// back and the rotation fails. Nothing is written when the store no
    /// longer holds `previous`.
    async fn persist_verified<K: KeySetDocument>(&self, previous: &K, next: &K) -> Result<()> {
        self.ensure_unchanged(previous).await?;
        match self.persist_written(next).await {
            Err(Error::RotationIntegrityFailure { key_type, reason }) => {
                let path = K::path(&self.settings);
                self.secrets.invalidate(path);
                match previous.encode() {
                    Ok(json) => {
                        if let Err(e) = self.secrets.put(path, &SecretString::new(json)).await {
                            error!(key_type = %K::KEY_TYPE, error = %e, "Failed to restore previous key set");
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to encode previous key set"),
                }
                Err(Error::RotationIntegrityFailure { key_type, reason })
            }
            other => other,
        }
    }

    /// The lease is not renewed while a rotation runs, so a writer that
    /// outlived its lease may race the next holder. The persisted version
    /// acts as the fence.
    async fn ensure_unchanged<K: KeySetDocument>(&self, previous: &K) -> Result<()> {
        let json = self.secrets.refresh(K::path(&self.settings)).await?;
        let stored = K::decode(json.expose_secret())?.version();
        if stored == previous.version() {
            return Ok(());
        }
        warn!(
            key_type = %K::KEY_TYPE,
            expected = previous.version(),
            stored,
            "Persisted key set changed during rotation; not writing"
        );
        Err(Error::rotation_conflict(
            K::KEY_TYPE.as_str(),
            format!("persisted version moved from {} to {} during rotation", previous.version(), stored),
        ))
    }

    async fn persist_written<K: KeySetDocument>(&self, next: &K) -> Result<()> {
        let path = K::path(&self.settings);
        let json = next.encode()?;
        self.secrets.put(path, &SecretString::new(json.clone())).await?;

        let cached = self.secrets.cached(path)?;
        let reason = if !cached.is_some_and(|value| value.expose_secret() == json) {
            Some("cached key set does not match the written value".to_string())
        } else {
            match self.secrets.refresh(path).await {
                Ok(stored) if stored.expose_secret() == json => None,
                Ok(_) => Some("secret store returned a different key set than was written".to_string()),
                Err(e) => Some(format!("secret store read-back failed: {}", e)),
            }
        };

        match reason {
            None => Ok(()),
            Some(reason) => Err(self.integrity_failure(K::KEY_TYPE, next.version(), reason)),
        }
    }
}

fn snapshot<T>(slot: &RwLock<Arc<T>>) -> Arc<T> {
    slot.read().unwrap_or_else(|p| p.into_inner()).clone()
}

fn install<T>(slot: &RwLock<Arc<T>>, value: Arc<T>) {
    *slot.write().unwrap_or_else(|p| p.into_inner()) = value;
}
