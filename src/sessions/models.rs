//! Refresh session records and the opaque refresh token format.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::crypto;
use crate::errors::{Error, Result};
use crate::secrets::SecretString;

const TOKEN_PREFIX: &str = "rt";
const SECRET_BYTES: usize = 32;

/// Free-form client details recorded at login (user agent, IP, device).
pub type ClientMetadata = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Revoked,
    Expired,
}

/// One refresh session. The rotation hash is the SHA-256 of the secret part
/// of the only refresh token currently accepted for it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSession {
    pub session_id: String,
    pub user_id: String,
    #[serde(skip)]
    pub rotation_hash: String,
    #[serde(skip)]
    pub previous_rotation_hash: Option<String>,
    pub scopes: Vec<String>,
    pub client_metadata: ClientMetadata,
    pub issued_at: DateTime<Utc>,
    pub last_rotated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoke_reason: Option<String>,
    pub version: i64,
}

impl RefreshSession {
    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if self.revoked_at.is_some() {
            SessionState::Revoked
        } else if self.expires_at <= now {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }
}

/// Opaque refresh token `rt.<session_id>.<secret>`.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub session_id: String,
    secret: SecretString,
}

impl RefreshToken {
    pub fn new_session_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Fresh token for `session_id` with a random secret.
    pub fn issue(session_id: &str) -> Result<Self> {
        let secret = crypto::random_token(SECRET_BYTES)?;
        Ok(Self { session_id: session_id.to_string(), secret: SecretString::new(secret) })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(TOKEN_PREFIX), Some(session_id), Some(secret), None)
                if !session_id.is_empty() && !secret.is_empty() =>
            {
                Ok(Self { session_id: session_id.to_string(), secret: SecretString::new(secret) })
            }
            _ => Err(Error::token_malformed("refresh token format")),
        }
    }

    /// SHA-256 of the secret; the only form ever stored.
    pub fn rotation_hash(&self) -> String {
        crypto::sha256_hex(self.secret.expose_secret().as_bytes())
    }

    /// The wire form handed to the client.
    pub fn to_secret_string(&self) -> SecretString {
        SecretString::new(format!(
            "{}.{}.{}",
            TOKEN_PREFIX,
            self.session_id,
            self.secret.expose_secret()
        ))
    }
}
