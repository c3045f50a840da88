use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use linkhub::{build_state, AppConfig, AppState};
use serde_json::Value;
use tower::ServiceExt;

pub const ALICE: &str = "alice-session";
#[allow(dead_code)]
pub const BOB: &str = "bob-session";

/// Offline configuration with two channels, `alice` and `bob`.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.media_fetch = false;
    config.sessions.insert(ALICE.into(), "alice".into());
    config.sessions.insert(BOB.into(), "bob".into());
    config
}

#[allow(dead_code)]
pub fn test_state() -> AppState {
    build_state(test_config()).unwrap()
}

/// Drive one request through the router and decode the JSON answer
/// (`Value::Null` for empty or non-JSON bodies).
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}
