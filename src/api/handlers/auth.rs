//! Refresh and logout endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::error::ApiError;
use crate::app::AppState;
use crate::tokens::TokenPair;

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokenBody {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

impl TokenResponse {
    fn from_pair(pair: &TokenPair, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            access_token: pair.access.token.expose_secret().to_string(),
            refresh_token: pair.refresh.token.expose_secret().to_string(),
            token_type: "Bearer".to_string(),
            expires_in: (pair.access.expires_at - now).num_seconds().max(0),
            refresh_expires_in: (pair.refresh.expires_at - now).num_seconds().max(0),
        }
    }
}

#[instrument(skip(state, body), name = "api.refresh")]
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshTokenBody>,
) -> Result<Json<TokenResponse>, ApiError> {
    let pair = state
        .tokens
        .refresh(&body.refresh_token)
        .await
        .map_err(|err| ApiError::audited(&state.events, "/auth/refresh", err))?;
    Ok(Json(TokenResponse::from_pair(&pair, state.clock.now())))
}

#[instrument(skip(state, body), name = "api.logout")]
pub async fn logout_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshTokenBody>,
) -> Result<StatusCode, ApiError> {
    state.tokens.logout(&body.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}
