//! Security event model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] =
        [Severity::Low, Severity::Medium, Severity::High, Severity::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a stored severity or kind fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid security event field: {0}")]
pub struct EventParseError(pub String);

impl FromStr for Severity {
    type Err = EventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(EventParseError(other.to_string())),
        }
    }
}

macro_rules! event_kinds {
    ($($variant:ident => ($label:literal, $severity:ident)),+ $(,)?) => {
        /// Everything the security log knows how to record.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum SecurityEventKind {
            $($variant),+
        }

        impl SecurityEventKind {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(SecurityEventKind::$variant => $label),+
                }
            }

            pub fn default_severity(&self) -> Severity {
                match self {
                    $(SecurityEventKind::$variant => Severity::$severity),+
                }
            }
        }

        impl FromStr for SecurityEventKind {
            type Err = EventParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok(SecurityEventKind::$variant),)+
                    other => Err(EventParseError(other.to_string())),
                }
            }
        }
    };
}

event_kinds! {
    // Refresh sessions
    RefreshTokenReuse => ("refresh_token_reuse", Critical),
    RefreshRaceTolerated => ("refresh_race_tolerated", Low),
    SessionRevoked => ("session_revoked", Low),
    UserSessionsRevoked => ("user_sessions_revoked", High),
    // Token validation
    TokenRejected => ("token_rejected", Low),
    AuthorizationDenied => ("authorization_denied", Medium),
    // Secrets client
    CircuitOpened => ("circuit_opened", Medium),
    CircuitClosed => ("circuit_closed", Low),
    CacheCorrupted => ("cache_corrupted", High),
    CacheInvalidated => ("cache_invalidated", Medium),
    EmergencyModeChanged => ("emergency_mode_changed", Critical),
    // Key rotation
    KeyRotated => ("key_rotated", Low),
    KeyPromoted => ("key_promoted", Low),
    KeyPurged => ("key_purged", Low),
    KeysReloaded => ("keys_reloaded", Low),
    ForcedRotation => ("forced_rotation", High),
    RotationLockTimeout => ("rotation_lock_timeout", Medium),
    RotationIntegrityFailure => ("rotation_integrity_failure", Critical),
    RotationFailed => ("rotation_failed", High),
    // Webhooks
    InvalidSignature => ("invalid_signature", High),
    StalePayload => ("stale_payload", Medium),
    ReplayDetected => ("replay_detected", High),
    RateLimited => ("rate_limited", Medium),
    PayloadTooLarge => ("payload_too_large", Medium),
    WebhookUnauthorized => ("webhook_unauthorized", High),
    MalformedWebhook => ("malformed_webhook", Medium),
}

impl Display for SecurityEventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of something security relevant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub id: Uuid,
    pub kind: SecurityEventKind,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity: kind.default_severity(),
            timestamp,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels_roundtrip() {
        for kind in [
            SecurityEventKind::RefreshTokenReuse,
            SecurityEventKind::ReplayDetected,
            SecurityEventKind::CircuitOpened,
            SecurityEventKind::RotationIntegrityFailure,
        ] {
            assert_eq!(kind.as_str().parse::<SecurityEventKind>().unwrap(), kind);
        }
        assert!("nope".parse::<SecurityEventKind>().is_err());
    }

    #[test]
    fn test_default_severities() {
        assert_eq!(SecurityEventKind::RefreshTokenReuse.default_severity(), Severity::Critical);
        assert_eq!(SecurityEventKind::CircuitOpened.default_severity(), Severity::Medium);
        assert_eq!(
            SecurityEventKind::RotationIntegrityFailure.default_severity(),
            Severity::Critical
        );
        assert!(Severity::Critical > Severity::Low);
    }

    #[test]
    fn test_builder_metadata() {
        let event = SecurityEvent::new(SecurityEventKind::ReplayDetected, Utc::now())
            .with("nonce_hash", "abc")
            .with_severity(Severity::Critical);
        assert_eq!(event.metadata.get("nonce_hash").map(String::as_str), Some("abc"));
        assert_eq!(event.severity, Severity::Critical);
    }
}
