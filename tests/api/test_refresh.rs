use axum::http::{Method, StatusCode};
use keywarden::monitor::{SecurityEventKind, Severity};
use keywarden::sessions::SessionState;
use keywarden::tokens::ValidatedToken;
use serde_json::{json, Value};

use crate::support::{read_json, send_request, setup_test_app};

#[tokio::test]
async fn refresh_rotates_and_reuse_revokes_the_session() {
    let app = setup_test_app().await;
    let login = app.login("alice").await;
    let r1 = login.refresh.token.expose_secret().to_string();

    let response =
        send_request(&app, Method::POST, "/auth/refresh", None, Some(json!({ "refresh_token": r1 }))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = read_json(response).await;
    let r2 = body["refresh_token"].as_str().expect("refresh token").to_string();
    assert_ne!(r1, r2);
    assert_eq!(body["token_type"], "Bearer");

    let access = body["access_token"].as_str().expect("access token");
    let validated = app.state.tokens.validate(access).await.unwrap();
    assert!(matches!(validated, ValidatedToken::Access(ref p) if p.subject == "alice"));

    let response =
        send_request(&app, Method::POST, "/auth/refresh", None, Some(json!({ "refresh_token": r1 }))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = read_json(response).await;
    assert_eq!(body["error"], "unauthorized");
    assert_eq!(body["message"], "unauthorized");
    assert!(body["incidentId"].is_string());

    let session = app.state.sessions.get(&login.session_id).await.unwrap().unwrap();
    assert_eq!(session.state(app.state.clock.now()), SessionState::Revoked);

    let critical = app
        .state
        .events
        .recent(100)
        .into_iter()
        .filter(|e| e.severity == Severity::Critical)
        .count();
    assert_eq!(critical, 1);
    assert_eq!(app.state.events.count(SecurityEventKind::RefreshTokenReuse), 1);

    // the legitimate holder is locked out as well
    let response =
        send_request(&app, Method::POST, "/auth/refresh", None, Some(json!({ "refresh_token": r2 }))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reuse_and_garbage_are_indistinguishable_to_clients() {
    let app = setup_test_app().await;
    let login = app.login("bob").await;
    let r1 = login.refresh.token.expose_secret().to_string();
    send_request(&app, Method::POST, "/auth/refresh", None, Some(json!({ "refresh_token": r1 }))).await;

    let reused: Value = read_json(
        send_request(&app, Method::POST, "/auth/refresh", None, Some(json!({ "refresh_token": r1 }))).await,
    )
    .await;
    let garbage: Value = read_json(
        send_request(&app, Method::POST, "/auth/refresh", None, Some(json!({ "refresh_token": "rt.nope" })))
            .await,
    )
    .await;

    assert_eq!(reused["error"], garbage["error"]);
    assert_eq!(reused["message"], garbage["message"]);

    let reasons: Vec<String> = app
        .state
        .events
        .recent(100)
        .into_iter()
        .filter(|e| e.kind == SecurityEventKind::TokenRejected)
        .filter_map(|e| e.metadata.get("reason").cloned())
        .collect();
    assert!(reasons.iter().any(|r| r == "reuse_detected"));
    assert!(reasons.iter().any(|r| r == "token_malformed"));
}

#[tokio::test]
async fn logout_is_idempotent() {
    let app = setup_test_app().await;
    let login = app.login("carol").await;
    let token = login.refresh.token.expose_secret().to_string();

    for _ in 0..2 {
        let response =
            send_request(&app, Method::POST, "/auth/logout", None, Some(json!({ "refresh_token": token }))).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let session = app.state.sessions.get(&login.session_id).await.unwrap().unwrap();
        assert_eq!(session.state(app.state.clock.now()), SessionState::Revoked);
    }

    let response =
        send_request(&app, Method::POST, "/auth/logout", None, Some(json!({ "refresh_token": "garbage" }))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response =
        send_request(&app, Method::POST, "/auth/refresh", None, Some(json!({ "refresh_token": token }))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn guessed_secret_for_a_known_session_cannot_lock_out_its_owner() {
    let app = setup_test_app().await;
    let login = app.login("dave").await;
    let genuine = login.refresh.token.expose_secret().to_string();

    let access = app.state.tokens.validate(login.access.token.expose_secret()).await.unwrap();
    let ValidatedToken::Access(principal) = access else { panic!("expected an access token") };
    let forged = format!("rt.{}.attacker-guess", principal.session_id.expect("sid claim"));

    let response =
        send_request(&app, Method::POST, "/auth/refresh", None, Some(json!({ "refresh_token": forged }))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response =
        send_request(&app, Method::POST, "/auth/logout", None, Some(json!({ "refresh_token": forged }))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(app.state.events.count(SecurityEventKind::RefreshTokenReuse), 0);
    let session = app.state.sessions.get(&login.session_id).await.unwrap().unwrap();
    assert_eq!(session.state(app.state.clock.now()), SessionState::Active);

    let response =
        send_request(&app, Method::POST, "/auth/refresh", None, Some(json!({ "refresh_token": genuine }))).await;
    assert_eq!(response.status(), StatusCode::OK);
}
