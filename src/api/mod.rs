//! # HTTP API
//!
//! Axum router for key discovery, refresh/logout, rotation webhooks and the
//! administrative security controls.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use routes::{build_router, SCOPE_ADMIN_MONITOR, SCOPE_ADMIN_WRITE};
pub use server::start_api_server;
