//! Common test utilities for integration tests.
//!
//! Every test app runs against the in-memory profile store, the in-memory
//! local store and the mock push provider, so no database is needed.

// Not every helper is used by every test binary.
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use domain::models::DeviceRecord;
use domain::services::{ManualClock, MemoryLocalStore, MemoryProfileStore, MockPushProvider};
use mentor_push_api::{
    app::{create_app, AppState, Backends},
    config::Config,
};
use serde_json::{json, Value};
use shared::session_token::issue_shared_secret_token;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "test_secret_key_for_session_testing_12345";

pub const FIREFOX_MAC: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.5; rv:126.0) Gecko/20100101 Firefox/126.0";

/// A running test app plus handles to its in-memory backends.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub profiles: Arc<MemoryProfileStore>,
    pub provider: Arc<MockPushProvider>,
    pub clock: Arc<ManualClock>,
}

pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

/// Build a test app around `provider`.
pub async fn create_test_app_with(provider: MockPushProvider) -> TestApp {
    let config = Config::load_for_test(&[]).expect("Failed to load test config");
    let profiles = Arc::new(MemoryProfileStore::new());
    let provider = Arc::new(provider);
    let clock = Arc::new(ManualClock::new(test_now()));

    let backends = Backends {
        profile_store: profiles.clone(),
        local_store: Arc::new(MemoryLocalStore::new()),
        provider: provider.clone(),
        clock: clock.clone(),
    };
    let state = AppState::new(config, None, backends)
        .await
        .expect("Failed to build app state");

    TestApp {
        router: create_app(state.clone()),
        state,
        profiles,
        provider,
        clock,
    }
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(MockPushProvider::new()).await
}

/// Bearer token for `user_id`, valid for an hour.
pub fn bearer(user_id: &str) -> String {
    let token = issue_shared_secret_token(TEST_SECRET, user_id, 3600)
        .expect("Failed to issue session token");
    format!("Bearer {}", token)
}

pub fn request(method: Method, uri: &str, auth: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send(app: &TestApp, req: Request<Body>) -> Response {
    app.router.clone().oneshot(req).await.unwrap()
}

/// Send a request and return status plus parsed JSON body (`Null` when empty).
pub async fn call(
    app: &TestApp,
    method: Method,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let response = send(app, request(method, uri, auth, body)).await;
    let status = response.status();
    (status, parse_response_body(response).await)
}

pub async fn parse_response_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    }
}

/// Open a push session for `user_id` from a Firefox on macOS console.
pub async fn sign_in(app: &TestApp, user_id: &str) -> String {
    let auth = bearer(user_id);
    let (status, _) = call(
        app,
        Method::POST,
        "/api/v1/session",
        Some(&auth),
        Some(json!({ "userAgent": FIREFOX_MAC, "platform": "MacIntel" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    auth
}

pub fn device(token: &str, user_agent: &str, platform: &str, seen: DateTime<Utc>) -> DeviceRecord {
    DeviceRecord {
        token: token.to_string(),
        name: None,
        platform: Some(platform.to_string()),
        user_agent: Some(user_agent.to_string()),
        enabled: true,
        created_at: seen,
        last_seen_at: seen,
    }
}

/// Raw provider envelope for a push message.
pub fn push_message(kind: &str, event_id: &str, title: &str, body: &str) -> Value {
    json!({
        "notification": { "title": title, "body": body },
        "data": { "type": kind, "eventId": event_id, "url": "/sessions/42" }
    })
}
