//! Error types for secret store and secrets client operations.

use thiserror::Error;

/// Result type for secrets operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Errors that can occur while reading or writing secrets.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// Secret not found in the backend.
    #[error("Secret not found: {key}")]
    NotFound { key: String },

    /// Failed to connect to the secrets backend.
    #[error("Backend connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Authentication with the secrets backend failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// A backend call exceeded its deadline.
    #[error("Backend call for '{key}' timed out after {timeout_ms}ms")]
    Timeout { key: String, timeout_ms: u64 },

    /// No network call was possible and no usable cached value exists.
    #[error("Secrets provider unavailable: {message}")]
    Unavailable { message: String },

    /// A cached value failed authentication on decrypt.
    #[error("Cached secret for '{path}' is corrupted")]
    Corrupted { path: String },

    /// Invalid secret path format.
    #[error("Invalid secret path: {key} - {reason}")]
    InvalidKey { key: String, reason: String },

    /// Backend-specific error.
    #[error("Backend error: {message}")]
    BackendError { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SecretsError {
    /// Create a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: message.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into() }
    }

    pub fn corrupted(path: impl Into<String>) -> Self {
        Self::Corrupted { path: path.into() }
    }

    /// Create an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into(), reason: reason.into() }
    }

    /// Create a backend error.
    pub fn backend_error(message: impl Into<String>) -> Self {
        Self::BackendError { message: message.into() }
    }

    /// Create a config error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether this failure says something about backend health.
    ///
    /// A missing secret or a malformed path is an answer from a healthy
    /// backend and must not trip the circuit breaker.
    pub fn counts_as_backend_failure(&self) -> bool {
        matches!(
            self,
            SecretsError::ConnectionFailed { .. }
                | SecretsError::AuthenticationFailed { .. }
                | SecretsError::Timeout { .. }
                | SecretsError::BackendError { .. }
                | SecretsError::Internal { .. }
        )
    }
}
