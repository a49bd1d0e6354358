//! # Key Management
//!
//! Signing and encryption keys, their rotation with overlap windows, the
//! per-key-type rotation lock and the published JWKS.

pub mod jwks;
pub mod lock;
pub mod rotation;
pub mod scheduler;
pub mod types;

pub use jwks::{Jwk, Jwks};
pub use lock::{LocalRotationLock, LockLease, RotationLock, SqlxRotationLock};
pub use rotation::{
    KeyRotationNotice, KeyRotationService, KeyRotationSettings, KeyStatus, RotationOutcome,
};
pub use scheduler::RotationScheduler;
pub use types::{
    EncryptedBlob, EncryptionKey, EncryptionKeyRing, KeyType, SigningKey, SigningKeySet,
    SigningKeyStatus, SIGNING_ALGORITHM,
};
