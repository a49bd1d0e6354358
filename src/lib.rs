//! # Keywarden
//!
//! Credential and secret-rotation core for a service that signs its own
//! tokens. It keeps signing and encryption keys in an external secret store,
//! rotates them without a verification gap, issues and validates session,
//! access, refresh and machine-to-machine tokens, detects refresh token
//! reuse, and authenticates the rotation webhooks the secret store sends.
//!
//! ## Architecture
//!
//! ```text
//! secret store --webhook--> WebhookSecurityGate --> KeyRotationService
//!      ^                                                  |
//!      +------------- SecretsClient (cache) <-------------+
//!                                                         v
//!     RefreshSessionStore <----------------------- TokenService
//!
//!                 SecurityMonitor observes all of the above
//! ```
//!
//! [`app::App`] wires the components; [`api::build_router`] exposes them over
//! HTTP.

pub mod api;
pub mod app;
pub mod cli;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod keys;
pub mod monitor;
pub mod observability;
pub mod secrets;
pub mod sessions;
pub mod storage;
pub mod tokens;
pub mod webhooks;

pub use app::{App, AppState};
pub use config::AppConfig;
pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
