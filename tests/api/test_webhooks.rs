use axum::http::StatusCode;
use chrono::Duration;
use keywarden::keys::{Jwks, KeyType};
use keywarden::monitor::SecurityEventKind;
use serde_json::{json, Value};

use crate::support::{read_json, send_request, send_webhook, setup_test_app, Delivery};

const SIGNING_CHANGED: &str = "/internal/keys/changed";
const ENCRYPTION_CHANGED: &str = "/internal/keys/aes-active-changed";

#[tokio::test]
async fn accepted_webhook_reloads_keys_rotated_elsewhere() {
    let app = setup_test_app().await;
    let peer = app.peer().await;
    let outcome = peer.keys.rotate(KeyType::Signing).await.unwrap();
    assert!(!app.state.keys.get_jwks().contains(&outcome.kid));

    let response = send_webhook(&app, Delivery::new(&app, SIGNING_CHANGED, "nonce-1")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = read_json(response).await;
    assert_eq!(body["accepted"], true);
    assert_eq!(body["reloaded"], true);
    assert_eq!(body["keyType"], "signing");

    let jwks: Jwks =
        read_json(send_request(&app, axum::http::Method::GET, "/.well-known/jwks.json", None, None).await).await;
    assert!(jwks.contains(&outcome.kid));
}

#[tokio::test]
async fn replayed_nonce_is_rejected_without_rotation() {
    let app = setup_test_app().await;
    let response = send_webhook(&app, Delivery::new(&app, SIGNING_CHANGED, "nonce-replay")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let version_before = app.state.keys.signing_keys().version;
    let replays_before = app.state.events.count(SecurityEventKind::ReplayDetected);

    app.clock.advance(Duration::minutes(2));
    let mut replay = Delivery::new(&app, SIGNING_CHANGED, "nonce-replay");
    replay.timestamp = app.state.clock.now();
    let response = send_webhook(&app, replay).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = read_json(response).await;
    assert_eq!(body["error"], "unauthorized");
    assert!(body["incidentId"].is_string());

    assert_eq!(app.state.events.count(SecurityEventKind::ReplayDetected), replays_before + 1);
    assert_eq!(app.state.keys.signing_keys().version, version_before);
}

#[tokio::test]
async fn stale_timestamp_is_rejected() {
    let app = setup_test_app().await;
    let mut delivery = Delivery::new(&app, SIGNING_CHANGED, "nonce-stale");
    delivery.timestamp = app.state.clock.now() - Duration::minutes(6);

    let response = send_webhook(&app, delivery).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.state.events.count(SecurityEventKind::StalePayload), 1);
}

#[tokio::test]
async fn transport_bearer_is_required() {
    let app = setup_test_app().await;

    let mut missing = Delivery::new(&app, SIGNING_CHANGED, "nonce-a");
    missing.bearer = None;
    assert_eq!(send_webhook(&app, missing).await.status(), StatusCode::UNAUTHORIZED);

    let mut wrong = Delivery::new(&app, SIGNING_CHANGED, "nonce-b");
    wrong.bearer = Some("not-the-bearer");
    assert_eq!(send_webhook(&app, wrong).await.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(app.state.events.count(SecurityEventKind::WebhookUnauthorized), 2);
}

#[tokio::test]
async fn forged_signature_is_rejected() {
    let app = setup_test_app().await;
    let mut forged = Delivery::new(&app, SIGNING_CHANGED, "nonce-forged");
    forged.hmac_key = "attacker-key";

    let response = send_webhook(&app, forged).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.state.events.count(SecurityEventKind::InvalidSignature), 1);

    // the nonce was never consumed, so the genuine delivery still goes through
    let genuine = Delivery::new(&app, SIGNING_CHANGED, "nonce-forged");
    assert_eq!(send_webhook(&app, genuine).await.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn oversized_payload_is_rejected() {
    let app = setup_test_app().await;
    let mut delivery = Delivery::new(&app, SIGNING_CHANGED, "nonce-big");
    delivery.body = json!({ "nonce": "nonce-big", "padding": "x".repeat(1024 * 1024 + 1) });

    let response = send_webhook(&app, delivery).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.state.events.count(SecurityEventKind::PayloadTooLarge), 1);
}

#[tokio::test]
async fn encryption_webhook_switches_active_key() {
    let app = setup_test_app().await;
    let blob = app.state.keys.encrypt(b"customer record").unwrap();

    let peer = app.peer().await;
    let outcome = peer.keys.rotate(KeyType::Encryption).await.unwrap();

    let response = send_webhook(&app, Delivery::new(&app, ENCRYPTION_CHANGED, "nonce-aes")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(app.state.keys.encryption_keys().active_kid(), outcome.kid);

    // data sealed under the previous key still opens during the overlap window
    assert_eq!(app.state.keys.decrypt(&blob).unwrap(), b"customer record");
    let fresh = app.state.keys.encrypt(b"new record").unwrap();
    assert_eq!(fresh.kid, outcome.kid);
    assert_eq!(peer.keys.decrypt(&fresh).unwrap(), b"new record");
}

#[tokio::test]
async fn secret_store_outage_is_not_blamed_on_the_sender() {
    let app = setup_test_app().await;
    app.store.set_available(false);
    app.state.secrets.invalidate_all();

    let response = send_webhook(&app, Delivery::new(&app, SIGNING_CHANGED, "nonce-outage")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(app.state.events.count(SecurityEventKind::WebhookUnauthorized), 0);
}
