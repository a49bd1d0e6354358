use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::errors::Error;
use crate::monitor::{SecurityEventKind, SecurityLog};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// Every authentication failure. The body never says which check failed.
    Unauthorized { incident_id: Option<Uuid> },
    Forbidden { incident_id: Option<Uuid> },
    NotFound(String),
    Conflict(String),
    PayloadTooLarge,
    TooManyRequests { incident_id: Option<Uuid>, retry_after_secs: Option<u32> },
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(incident_id: Uuid) -> Self {
        ApiError::Unauthorized { incident_id: Some(incident_id) }
    }

    pub fn forbidden(incident_id: Uuid) -> Self {
        ApiError::Forbidden { incident_id: Some(incident_id) }
    }

    /// Map a service error, recording authentication failures as security
    /// events so the generic 401 can point at them.
    pub fn audited(events: &SecurityLog, route: &str, err: Error) -> Self {
        if err.is_authentication_failure() {
            let event = events
                .event(SecurityEventKind::TokenRejected)
                .with("reason", reason_label(&err))
                .with("route", route)
                .with("detail", &err);
            let incident_id = events.record(event);
            return ApiError::unauthorized(incident_id);
        }
        ApiError::from(err)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Session revocations carry their own reason, e.g. `reuse_detected`.
fn reason_label(err: &Error) -> String {
    match err {
        Error::SessionRevoked { reason } => reason.clone(),
        other => other.kind().to_string(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    incident_id: Option<Uuid>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (error, message, incident_id, retry_after) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg, None, None),
            ApiError::Unauthorized { incident_id } => {
                ("unauthorized", "unauthorized".to_string(), incident_id, None)
            }
            ApiError::Forbidden { incident_id } => ("forbidden", "forbidden".to_string(), incident_id, None),
            ApiError::NotFound(msg) => ("not_found", msg, None, None),
            ApiError::Conflict(msg) => ("conflict", msg, None, None),
            ApiError::PayloadTooLarge => ("payload_too_large", "payload too large".to_string(), None, None),
            ApiError::TooManyRequests { incident_id, retry_after_secs } => {
                ("rate_limited", "too many requests".to_string(), incident_id, retry_after_secs)
            }
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg, None, None),
            ApiError::Internal(msg) => ("internal_error", msg, None, None),
        };

        let mut response = (status, Json(ErrorBody { error, message, incident_id })).into_response();
        if let Some(secs) = retry_after {
            response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if err.is_authentication_failure() {
            return ApiError::Unauthorized { incident_id: None };
        }
        match err {
            Error::Validation { message, .. } => ApiError::BadRequest(message),
            Error::Serialization { context, .. } => ApiError::BadRequest(context),
            Error::NotFound { resource_type, id } => {
                ApiError::NotFound(format!("{} '{}' not found", resource_type, id))
            }
            Error::RateLimited(_) => ApiError::TooManyRequests { incident_id: None, retry_after_secs: None },
            Error::SecretsProviderUnavailable(_) => {
                ApiError::ServiceUnavailable("secret store unavailable".to_string())
            }
            Error::RotationLockTimeout { key_type, .. } => {
                ApiError::ServiceUnavailable(format!("rotation of '{}' in progress, retry later", key_type))
            }
            Error::RotationConflict { reason, .. } => ApiError::Conflict(reason),
            other => {
                warn!(error = %other, kind = other.kind(), "request failed");
                ApiError::Internal("internal server error".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_auth_failures_share_one_body() {
        let events = SecurityLog::new(ManualClock::starting_now(), 16);
        let expired = ApiError::audited(&events, "/auth/refresh", Error::TokenExpired).into_response();
        let reused = ApiError::audited(
            &events,
            "/auth/refresh",
            Error::session_revoked(crate::sessions::REASON_REUSE_DETECTED),
        )
        .into_response();

        assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(reused.status(), StatusCode::UNAUTHORIZED);

        let a = body_json(expired).await;
        let b = body_json(reused).await;
        assert_eq!(a["error"], b["error"]);
        assert_eq!(a["message"], b["message"]);
        assert_ne!(a["incidentId"], b["incidentId"]);

        let recent = events.recent(2);
        assert!(recent.iter().any(|e| e.metadata.get("reason").map(String::as_str) == Some("token_expired")));
        assert!(recent.iter().any(|e| e.metadata.get("reason").map(String::as_str) == Some("reuse_detected")));
    }

    #[tokio::test]
    async fn test_incident_id_matches_event() {
        let events = SecurityLog::new(ManualClock::starting_now(), 16);
        let err = ApiError::audited(&events, "/x", Error::signature_invalid("bad"));
        let ApiError::Unauthorized { incident_id: Some(id) } = err else {
            panic!("expected unauthorized");
        };
        assert_eq!(events.recent(1)[0].id, id);
    }

    #[tokio::test]
    async fn test_non_auth_errors_are_not_audited() {
        let events = SecurityLog::new(ManualClock::starting_now(), 16);
        let err = ApiError::audited(&events, "/x", Error::validation("bad scope"));
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(events.recent(10).is_empty());
    }

    #[tokio::test]
    async fn test_retry_after_header() {
        let response =
            ApiError::TooManyRequests { incident_id: None, retry_after_secs: Some(42) }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn test_lock_timeout_is_unavailable() {
        let err = ApiError::from(Error::RotationLockTimeout { key_type: "signing".into(), waited_ms: 5 });
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_rotation_conflict_keeps_its_reason() {
        let err = ApiError::from(Error::rotation_conflict("signing", "staged key promotes later"));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(matches!(err, ApiError::Conflict(ref msg) if msg == "staged key promotes later"));
    }
}
