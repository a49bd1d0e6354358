use axum::http::{Method, StatusCode};
use keywarden::monitor::SecurityEventKind;
use serde_json::{json, Value};

use crate::support::{read_json, send_request, setup_test_app};

#[tokio::test]
async fn status_requires_a_token() {
    let app = setup_test_app().await;

    let response = send_request(&app, Method::GET, "/internal/security/status", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = read_json(response).await;
    assert_eq!(body["error"], "unauthorized");
    assert_eq!(body["message"], "unauthorized");

    let incident = body["incidentId"].as_str().expect("incident id");
    let event = app.state.events.recent(1).remove(0);
    assert_eq!(event.id.to_string(), incident);
    assert_eq!(event.kind, SecurityEventKind::TokenRejected);
}

#[tokio::test]
async fn status_reports_keys_and_secrets() {
    let app = setup_test_app().await;
    let token = app.m2m_token("admin.monitor").await;

    let response = send_request(&app, Method::GET, "/internal/security/status", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = read_json(response).await;
    assert_eq!(body["secrets"]["backend"], "memory");
    assert_eq!(body["secrets"]["emergencyMode"], false);
    assert_eq!(body["keys"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn write_controls_need_admin_write() {
    let app = setup_test_app().await;
    let token = app.m2m_token("admin.monitor").await;

    let response = send_request(
        &app,
        Method::POST,
        "/internal/security/force-rotation",
        Some(&token),
        Some(json!({ "keyType": "signing" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.state.events.count(SecurityEventKind::AuthorizationDenied), 1);
    assert_eq!(app.state.events.count(SecurityEventKind::ForcedRotation), 0);
}

#[tokio::test]
async fn force_rotation_stages_a_new_signing_key() {
    let app = setup_test_app().await;
    let token = app.m2m_token("admin.write").await;
    let before = app.state.keys.signing_keys().current().kid.clone();

    let response = send_request(
        &app,
        Method::POST,
        "/internal/security/force-rotation",
        Some(&token),
        Some(json!({ "keyType": "signing" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = read_json(response).await;
    assert_eq!(body["keyType"], "signing");
    assert_eq!(body["previousKid"], before.as_str());

    let kid = body["kid"].as_str().expect("kid");
    assert!(app.state.keys.get_jwks().contains(kid));
    assert_eq!(app.state.events.count(SecurityEventKind::ForcedRotation), 1);

    // tokens minted before the rotation keep validating
    let still_valid = app.state.tokens.validate(&token).await;
    assert!(still_valid.is_ok());
}

#[tokio::test]
async fn second_forced_rotation_inside_the_overlap_is_a_conflict() {
    let app = setup_test_app().await;
    let token = app.m2m_token("admin.write").await;
    let rotate = || {
        send_request(
            &app,
            Method::POST,
            "/internal/security/force-rotation",
            Some(&token),
            Some(json!({ "keyType": "signing" })),
        )
    };

    assert_eq!(rotate().await.status(), StatusCode::OK);
    let signing = app.state.keys.signing_keys();
    let jwks = app.state.keys.get_jwks();

    let response = rotate().await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = read_json(response).await;
    assert_eq!(body["error"], "conflict");

    assert_eq!(app.state.keys.signing_keys().version, signing.version);
    assert_eq!(app.state.keys.signing_keys().current().kid, signing.current().kid);
    assert_eq!(app.state.keys.get_jwks(), jwks);
    assert!(app.state.tokens.validate(&token).await.is_ok());
}

#[tokio::test]
async fn emergency_mode_toggles_cache_only_reads() {
    let app = setup_test_app().await;
    let token = app.m2m_token("admin.write").await;

    let response = send_request(
        &app,
        Method::POST,
        "/internal/security/emergency-mode",
        Some(&token),
        Some(json!({ "enabled": true })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = read_json(response).await;
    assert_eq!(body["enabled"], true);
    assert!(app.state.secrets.is_emergency());

    send_request(
        &app,
        Method::POST,
        "/internal/security/emergency-mode",
        Some(&token),
        Some(json!({ "enabled": false })),
    )
    .await;
    assert!(!app.state.secrets.is_emergency());
    assert_eq!(app.state.events.count(SecurityEventKind::EmergencyModeChanged), 2);
}

#[tokio::test]
async fn invalidate_user_sessions_blocks_refresh() {
    let app = setup_test_app().await;
    let token = app.m2m_token("admin.write").await;
    let login = app.login("mallory-victim").await;

    let response = send_request(
        &app,
        Method::POST,
        "/internal/security/invalidate-cache",
        Some(&token),
        Some(json!({ "scope": "userSessions", "userId": "mallory-victim" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = read_json(response).await;
    assert_eq!(body["sessionsRevoked"], 1);

    let refresh = login.refresh.token.expose_secret().to_string();
    let response =
        send_request(&app, Method::POST, "/auth/refresh", None, Some(json!({ "refresh_token": refresh }))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_token_is_not_a_bearer_credential() {
    let app = setup_test_app().await;
    let login = app.login("dave").await;
    let refresh = login.refresh.token.expose_secret().to_string();

    let response = send_request(&app, Method::GET, "/internal/security/status", Some(&refresh), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
