//! HTTP handlers, one module per endpoint group.

pub mod auth;
pub mod health;
pub mod jwks;
pub mod security;
pub mod webhooks;

pub use auth::{logout_handler, refresh_handler, RefreshTokenBody, TokenResponse};
pub use health::{health_handler, HealthResponse};
pub use jwks::jwks_handler;
pub use security::{
    emergency_mode_handler, force_rotation_handler, invalidate_cache_handler, status_handler,
    EmergencyModeBody, EmergencyModeResponse, ForceRotationBody,
};
pub use webhooks::{encryption_key_changed_handler, signing_keys_changed_handler, WebhookAck};
