use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::app::AppState;

use super::{
    handlers::{
        emergency_mode_handler, encryption_key_changed_handler, force_rotation_handler,
        health_handler, invalidate_cache_handler, jwks_handler, logout_handler, refresh_handler,
        signing_keys_changed_handler, status_handler,
    },
    middleware::{authenticate, ensure_scopes, ScopeState},
};

pub const SCOPE_ADMIN_WRITE: &str = "admin.write";
pub const SCOPE_ADMIN_MONITOR: &str = "admin.monitor";

pub fn build_router(state: AppState) -> Router {
    let auth_layer = middleware::from_fn_with_state(state.clone(), authenticate);

    let scope_layer = |scopes: Vec<&str>| {
        let required: ScopeState =
            Arc::new(scopes.into_iter().map(|scope| scope.to_string()).collect());
        middleware::from_fn_with_state((state.clone(), required), ensure_scopes)
    };

    let admin_api = Router::new()
        .merge(
            Router::new()
                .route("/internal/security/force-rotation", post(force_rotation_handler))
                .route("/internal/security/emergency-mode", post(emergency_mode_handler))
                .route("/internal/security/invalidate-cache", post(invalidate_cache_handler))
                .route_layer(scope_layer(vec![SCOPE_ADMIN_WRITE])),
        )
        .merge(
            Router::new()
                .route("/internal/security/status", get(status_handler))
                .route_layer(scope_layer(vec![SCOPE_ADMIN_MONITOR])),
        )
        .layer(auth_layer);

    // Oversized deliveries still reach the gate so they are recorded; the
    // extractor cap only stops unbounded buffering.
    let webhook_body_cap = state.webhooks.settings().max_payload_bytes.saturating_mul(2);
    let webhook_api = Router::new()
        .route("/internal/keys/changed", post(signing_keys_changed_handler))
        .route("/internal/keys/aes-active-changed", post(encryption_key_changed_handler))
        .layer(DefaultBodyLimit::max(webhook_body_cap));

    let public_api = Router::new()
        .route("/health", get(health_handler))
        .route("/.well-known/jwks.json", get(jwks_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/logout", post(logout_handler));

    Router::new()
        .merge(public_api)
        .merge(webhook_api)
        .merge(admin_api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
