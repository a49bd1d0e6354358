//! Incident-response controls under `/internal/security`.

use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::app::AppState;
use crate::keys::{KeyType, RotationOutcome};
use crate::monitor::{CacheScope, InvalidationReport, MonitorStatus};
use crate::tokens::ValidatedToken;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceRotationBody {
    pub key_type: KeyType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmergencyModeBody {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyModeResponse {
    pub enabled: bool,
    pub incident_id: Uuid,
}

pub async fn force_rotation_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<ValidatedToken>,
    Json(body): Json<ForceRotationBody>,
) -> Result<Json<RotationOutcome>, ApiError> {
    let outcome = state.monitor.force_rotation(body.key_type, caller.subject()).await?;
    Ok(Json(outcome))
}

pub async fn emergency_mode_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<ValidatedToken>,
    Json(body): Json<EmergencyModeBody>,
) -> Json<EmergencyModeResponse> {
    let incident_id = state.monitor.emergency_mode(body.enabled, caller.subject());
    Json(EmergencyModeResponse { enabled: body.enabled, incident_id })
}

pub async fn invalidate_cache_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<ValidatedToken>,
    Json(scope): Json<CacheScope>,
) -> Result<Json<InvalidationReport>, ApiError> {
    let report = state.monitor.invalidate_cache(scope, caller.subject()).await?;
    Ok(Json(report))
}

pub async fn status_handler(State(state): State<AppState>) -> Json<MonitorStatus> {
    Json(state.monitor.status())
}
