use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, Response},
    Router,
};
use chrono::{DateTime, Utc};
use keywarden::{
    api::build_router,
    clock::ManualClock,
    config::AppConfig,
    secrets::InMemorySecretStore,
    sessions::ClientMetadata,
    storage::{create_memory_pool, DbPool},
    tokens::{ScopeSet, SessionTokens, TokenClass},
    webhooks::{compute_signature, SIGNATURE_HEADER, TIMESTAMP_HEADER},
    App, AppState,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tower::ServiceExt;

pub const WEBHOOK_HMAC_KEY: &str = "test-webhook-hmac-key";
pub const WEBHOOK_BEARER: &str = "test-webhook-bearer";

pub struct TestApp {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemorySecretStore>,
    pub pool: DbPool,
    config: AppConfig,
}

impl TestApp {
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Another node sharing the database, secret store and clock.
    pub async fn peer(&self) -> AppState {
        App::with_components(self.config.clone(), self.pool.clone(), self.store.clone(), self.clock.clone())
            .await
            .expect("build peer")
            .state
    }

    pub async fn m2m_token(&self, scopes: &str) -> String {
        let scopes = ScopeSet::parse(scopes).expect("scopes");
        let issued = self.state.tokens.issue(TokenClass::M2m, "ops-automation", &scopes).await.expect("issue");
        issued.token.expose_secret().to_string()
    }

    pub async fn login(&self, user_id: &str) -> SessionTokens {
        let scopes = ScopeSet::parse("profile.read").expect("scopes");
        self.state
            .tokens
            .start_session(user_id, &scopes, ClientMetadata::new())
            .await
            .expect("start session")
    }
}

pub async fn setup_test_app() -> TestApp {
    let config = AppConfig::default();
    let pool = create_memory_pool().await.expect("create sqlite pool");
    let store = Arc::new(InMemorySecretStore::new());
    store.seed(&config.secrets.webhook_hmac_path, WEBHOOK_HMAC_KEY);
    store.seed(&config.secrets.webhook_bearer_path, WEBHOOK_BEARER);
    let clock = ManualClock::starting_now();

    let app = App::with_components(config.clone(), pool.clone(), store.clone(), clock.clone())
        .await
        .expect("build app");

    TestApp { state: app.state, clock, store, pool, config }
}

pub async fn send_request(
    app: &TestApp,
    method: Method,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    let request = if let Some(json) = body {
        let bytes = serde_json::to_vec(&json).expect("serialize body");
        builder.header("content-type", "application/json").body(Body::from(bytes)).expect("build request")
    } else {
        builder.body(Body::empty()).expect("build request")
    };

    app.router().oneshot(request).await.expect("request")
}

/// Signed delivery as the secret store would send it.
pub struct Delivery<'a> {
    pub path: &'a str,
    pub body: Value,
    pub timestamp: DateTime<Utc>,
    pub hmac_key: &'a str,
    pub bearer: Option<&'a str>,
}

impl<'a> Delivery<'a> {
    pub fn new(app: &TestApp, path: &'a str, nonce: &str) -> Self {
        Self {
            path,
            body: serde_json::json!({ "nonce": nonce, "source": "vault" }),
            timestamp: app.state.clock.now(),
            hmac_key: WEBHOOK_HMAC_KEY,
            bearer: Some(WEBHOOK_BEARER),
        }
    }
}

pub async fn send_webhook(app: &TestApp, delivery: Delivery<'_>) -> Response<Body> {
    let payload = serde_json::to_vec(&delivery.body).expect("serialize body");
    let timestamp = delivery.timestamp.timestamp().to_string();
    let signature = compute_signature(delivery.hmac_key.as_bytes(), &timestamp, &payload);

    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(delivery.path)
        .header("content-type", "application/json")
        .header(TIMESTAMP_HEADER, &timestamp)
        .header(SIGNATURE_HEADER, format!("sha256={}", signature));
    if let Some(bearer) = delivery.bearer {
        builder = builder.header("Authorization", format!("Bearer {}", bearer));
    }
    let request = builder.body(Body::from(payload)).expect("build request");

    app.router().oneshot(request).await.expect("request")
}

pub async fn read_json<T: DeserializeOwned>(response: Response<Body>) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("read body");
    serde_json::from_slice(&bytes).expect("parse json")
}
