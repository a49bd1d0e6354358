//! Refresh sessions: one-time-use refresh tokens with reuse detection.

pub mod models;
pub mod repository;
pub mod store;

pub use models::{ClientMetadata, RefreshSession, RefreshToken, SessionState};
pub use repository::RefreshSessionRepository;
pub use store::{
    IssuedRefresh, RefreshSessionStore, RefreshSettings, REASON_LOGOUT, REASON_REUSE_DETECTED,
};
