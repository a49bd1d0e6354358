//! Public key discovery.

use axum::{
    extract::State,
    http::{header::CACHE_CONTROL, HeaderValue},
    response::IntoResponse,
    Json,
};

use crate::app::AppState;

/// Verifiers may cache for a minute; a staged key is published a full
/// overlap window before it signs anything.
const JWKS_CACHE_CONTROL: &str = "public, max-age=60";

pub async fn jwks_handler(State(state): State<AppState>) -> impl IntoResponse {
    let jwks = state.keys.get_jwks();
    ([(CACHE_CONTROL, HeaderValue::from_static(JWKS_CACHE_CONTROL))], Json(jwks))
}
