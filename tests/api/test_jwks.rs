use axum::http::{header::CACHE_CONTROL, Method, StatusCode};
use keywarden::keys::{Jwks, KeyType};
use serde_json::Value;

use crate::support::{read_json, send_request, setup_test_app};

#[tokio::test]
async fn jwks_publishes_current_key_without_private_material() {
    let app = setup_test_app().await;

    let response = send_request(&app, Method::GET, "/.well-known/jwks.json", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(CACHE_CONTROL).is_some());

    let body: Value = read_json(response).await;
    let keys = body["keys"].as_array().expect("keys array");
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kid"], app.state.keys.signing_keys().current().kid.as_str());
    assert_eq!(keys[0]["alg"], "EdDSA");
    for key in keys {
        assert!(key.get("d").is_none());
        assert!(key.get("pkcs8").is_none());
    }
}

#[tokio::test]
async fn jwks_includes_next_key_during_overlap() {
    let app = setup_test_app().await;
    let outcome = app.state.keys.rotate(KeyType::Signing).await.unwrap();

    let response = send_request(&app, Method::GET, "/.well-known/jwks.json", None, None).await;
    let jwks: Jwks = read_json(response).await;
    assert_eq!(jwks.keys.len(), 2);
    assert!(jwks.contains(&outcome.kid));
    assert!(jwks.contains(&outcome.previous_kid));
}
