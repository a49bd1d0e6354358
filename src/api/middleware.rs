//! Bearer authentication and scope checks for the administrative routes.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Extension, State},
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use tracing::{field, info_span, warn, Instrument};

use crate::api::error::ApiError;
use crate::app::AppState;
use crate::errors::Error;
use crate::monitor::SecurityEventKind;
use crate::tokens::ValidatedToken;

pub type ScopeState = Arc<Vec<String>>;

/// Pull the token out of an `Authorization: Bearer ...` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Validate the bearer token and attach the [`ValidatedToken`] to the request.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let correlation_id = uuid::Uuid::new_v4();
    let span = info_span!(
        "api.authenticate",
        http.method = %method,
        http.path = %path,
        auth.subject = field::Empty,
        correlation_id = %correlation_id
    );

    async move {
        let result = match bearer_token(request.headers()) {
            Some(token) => state.tokens.validate(token).await,
            None => Err(Error::token_malformed("missing bearer token")),
        };

        let validated = match result {
            // refresh tokens only unlock /auth/refresh
            Ok(ValidatedToken::Refresh(_)) => Err(Error::token_malformed("refresh token used as bearer")),
            other => other,
        };

        match validated {
            Ok(token) => {
                tracing::Span::current().record("auth.subject", field::display(token.subject()));
                request.extensions_mut().insert(token);
                Ok(next.run(request).await)
            }
            Err(err) => {
                warn!(%correlation_id, kind = err.kind(), "authentication failed");
                Err(ApiError::audited(&state.events, &path, err))
            }
        }
    }
    .instrument(span)
    .await
}

/// Require every scope in `required_scopes` on the authenticated token.
pub async fn ensure_scopes(
    State((state, required_scopes)): State<(AppState, ScopeState)>,
    Extension(token): Extension<ValidatedToken>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let required_summary = required_scopes.join(" ");
    let path = request.uri().path().to_string();
    let correlation_id = uuid::Uuid::new_v4();
    let span = info_span!(
        "api.ensure_scopes",
        http.path = %path,
        auth.subject = %token.subject(),
        required_scopes = %required_summary,
        correlation_id = %correlation_id
    );

    if required_scopes.iter().all(|scope| token.scopes().contains(scope)) {
        return Ok(next.run(request).instrument(span).await);
    }

    let _guard = span.enter();
    let granted = token.scopes().to_claim();
    warn!(%correlation_id, required = %required_summary, granted = %granted, "scope check failed");
    let event = state
        .events
        .event(SecurityEventKind::AuthorizationDenied)
        .with("subject", token.subject())
        .with("route", &path)
        .with("required", &required_summary)
        .with("granted", granted);
    Err(ApiError::forbidden(state.events.record(event)))
}
