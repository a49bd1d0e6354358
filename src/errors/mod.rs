//! # Error Handling
//!
//! Crate-wide error taxonomy for keywarden, built on `thiserror`.
//!
//! Every failure kind that can surface from key rotation, token handling,
//! refresh-session rotation or webhook verification has its own variant so
//! callers can match on it. The HTTP layer collapses all authentication
//! failures into one generic response; the variant itself only reaches the
//! security event log.

/// Custom result type for keywarden operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for keywarden
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A signature (token or webhook) did not verify, or referenced an unknown key id
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// A one-time value (webhook nonce) was presented twice
    #[error("Replay detected: {0}")]
    ReplayDetected(String),

    /// Caller exceeded its request budget
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// The external secret store is unreachable and no usable cached value exists
    #[error("Secrets provider unavailable: {0}")]
    SecretsProviderUnavailable(String),

    /// The per-key-type rotation lock was not acquired in time
    #[error("Rotation lock for '{key_type}' not acquired within {waited_ms}ms")]
    RotationLockTimeout { key_type: String, waited_ms: u64 },

    /// A freshly generated or persisted key failed its self-check
    #[error("Rotation integrity check failed for '{key_type}': {reason}")]
    RotationIntegrityFailure { key_type: String, reason: String },

    /// The key set cannot be rotated in its current state, or changed under the writer
    #[error("Rotation of '{key_type}' refused: {reason}")]
    RotationConflict { key_type: String, reason: String },

    /// Token or session lifetime elapsed
    #[error("Token expired")]
    TokenExpired,

    /// Token could not be parsed or is missing required claims
    #[error("Token malformed: {0}")]
    TokenMalformed(String),

    /// The refresh session is revoked; `reason` is server-side only
    #[error("Session revoked: {reason}")]
    SessionRevoked { reason: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Resource not found errors
    #[error("Resource not found: {resource_type} with ID '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// A locally cached secret failed authentication on decrypt
    #[error("Cached secret for '{path}' failed integrity check")]
    CacheCorrupted { path: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a database error with context
    pub fn database<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::Database { source, context: context.into() }
    }

    pub fn signature_invalid<S: Into<String>>(message: S) -> Self {
        Self::SignatureInvalid(message.into())
    }

    pub fn token_malformed<S: Into<String>>(message: S) -> Self {
        Self::TokenMalformed(message.into())
    }

    pub fn session_revoked<S: Into<String>>(reason: S) -> Self {
        Self::SessionRevoked { reason: reason.into() }
    }

    pub fn integrity<K: Into<String>, R: Into<String>>(key_type: K, reason: R) -> Self {
        Self::RotationIntegrityFailure { key_type: key_type.into(), reason: reason.into() }
    }

    pub fn rotation_conflict<K: Into<String>, R: Into<String>>(key_type: K, reason: R) -> Self {
        Self::RotationConflict { key_type: key_type.into(), reason: reason.into() }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// True for every failure that must be answered with a generic 401.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Error::SignatureInvalid(_)
                | Error::ReplayDetected(_)
                | Error::TokenExpired
                | Error::TokenMalformed(_)
                | Error::SessionRevoked { .. }
        )
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::SignatureInvalid(_)
            | Error::ReplayDetected(_)
            | Error::TokenExpired
            | Error::TokenMalformed(_)
            | Error::SessionRevoked { .. } => 401,
            Error::RateLimited(_) => 429,
            Error::SecretsProviderUnavailable(_) | Error::RotationLockTimeout { .. } => 503,
            Error::Validation { .. } | Error::Serialization { .. } => 400,
            Error::NotFound { .. } => 404,
            Error::RotationConflict { .. } => 409,
            Error::RotationIntegrityFailure { .. }
            | Error::Config(_)
            | Error::Database { .. }
            | Error::CacheCorrupted { .. }
            | Error::Io(_)
            | Error::Internal(_) => 500,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SecretsProviderUnavailable(_)
                | Error::RotationLockTimeout { .. }
                | Error::RotationConflict { .. }
                | Error::RateLimited(_)
                | Error::Database { .. }
        )
    }

    /// Stable snake_case label used in logs, metrics and security events.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SignatureInvalid(_) => "signature_invalid",
            Error::ReplayDetected(_) => "replay_detected",
            Error::RateLimited(_) => "rate_limited",
            Error::SecretsProviderUnavailable(_) => "secrets_provider_unavailable",
            Error::RotationLockTimeout { .. } => "rotation_lock_timeout",
            Error::RotationIntegrityFailure { .. } => "rotation_integrity_failure",
            Error::RotationConflict { .. } => "rotation_conflict",
            Error::TokenExpired => "token_expired",
            Error::TokenMalformed(_) => "token_malformed",
            Error::SessionRevoked { .. } => "session_revoked",
            Error::Config(_) => "config",
            Error::Validation { .. } => "validation",
            Error::NotFound { .. } => "not_found",
            Error::Database { .. } => "database",
            Error::CacheCorrupted { .. } => "cache_corrupted",
            Error::Serialization { .. } => "serialization",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::Config(format!("Database migration failed: {}", error))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}

impl From<crate::secrets::SecretsError> for Error {
    fn from(error: crate::secrets::SecretsError) -> Self {
        use crate::secrets::SecretsError;
        match error {
            SecretsError::NotFound { key } => Self::not_found("secret", key),
            SecretsError::Unavailable { message } => Self::SecretsProviderUnavailable(message),
            SecretsError::ConnectionFailed { message } => Self::SecretsProviderUnavailable(message),
            e @ SecretsError::Timeout { .. } => Self::SecretsProviderUnavailable(e.to_string()),
            SecretsError::Corrupted { path } => Self::CacheCorrupted { path },
            other => Self::Internal(other.to_string()),
        }
    }
}
