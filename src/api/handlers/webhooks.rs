//! Receivers for rotation notifications from the external secret store.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use tracing::{info, instrument};

use crate::api::error::ApiError;
use crate::api::middleware::bearer_token;
use crate::app::AppState;
use crate::keys::KeyType;
use crate::webhooks::{GateOutcome, Rejection, RejectionReason, WebhookRequest, SIGNATURE_HEADER, TIMESTAMP_HEADER};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub accepted: bool,
    pub key_type: KeyType,
    /// False when this node already had the announced version
    pub reloaded: bool,
}

/// `POST /internal/keys/changed`
pub async fn signing_keys_changed_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAck>), ApiError> {
    receive(&state, KeyType::Signing, &headers, &body).await
}

/// `POST /internal/keys/aes-active-changed`
pub async fn encryption_key_changed_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAck>), ApiError> {
    receive(&state, KeyType::Encryption, &headers, &body).await
}

#[instrument(skip(state, headers, body), fields(key_type = %key_type))]
async fn receive(
    state: &AppState,
    key_type: KeyType,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(StatusCode, Json<WebhookAck>), ApiError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let request = WebhookRequest {
        bearer: bearer_token(headers),
        signature: header(SIGNATURE_HEADER),
        timestamp: header(TIMESTAMP_HEADER),
        payload: body,
    };

    match state.webhooks.verify(request).await? {
        GateOutcome::Accepted(verified) => {
            let reloaded = state.keys.reload(key_type).await?;
            info!(source = %verified.source, reloaded, "Rotation webhook processed");
            Ok((StatusCode::ACCEPTED, Json(WebhookAck { accepted: true, key_type, reloaded })))
        }
        GateOutcome::Rejected(rejection) => Err(rejection_error(rejection)),
    }
}

fn rejection_error(rejection: Rejection) -> ApiError {
    match rejection.reason {
        RejectionReason::PayloadTooLarge => ApiError::PayloadTooLarge,
        RejectionReason::RateLimited => ApiError::TooManyRequests {
            incident_id: Some(rejection.incident_id),
            retry_after_secs: rejection.retry_after_secs,
        },
        RejectionReason::Malformed => ApiError::bad_request("malformed notification"),
        RejectionReason::Unauthorized
        | RejectionReason::StalePayload
        | RejectionReason::InvalidSignature
        | RejectionReason::ReplayDetected => ApiError::unauthorized(rejection.incident_id),
    }
}
