#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use common::{send, test_state, ALICE};
use linkhub::app;
use linkhub::error::AppError;
use linkhub::filters::ResponseFilter;
use serde_json::{json, Map, Value};

/// Appends its name to the payload's `filters` array.
struct Stamp(&'static str);

#[async_trait::async_trait]
impl ResponseFilter for Stamp {
    fn name(&self) -> &str {
        self.0
    }

    async fn apply(
        &self,
        _path: &str,
        _args: &Map<String, Value>,
        data: &mut Value,
    ) -> Result<(), AppError> {
        if let Value::Object(obj) = data {
            let seen = obj.entry("filters").or_insert_with(|| json!([]));
            if let Value::Array(seen) = seen {
                seen.push(json!(self.0));
            }
        }
        Ok(())
    }
}

/// Echoes the query arguments it was handed.
struct EchoArgs;

#[async_trait::async_trait]
impl ResponseFilter for EchoArgs {
    fn name(&self) -> &str {
        "echo_args"
    }

    async fn apply(
        &self,
        _path: &str,
        args: &Map<String, Value>,
        data: &mut Value,
    ) -> Result<(), AppError> {
        if let Value::Object(obj) = data {
            obj.insert("args".into(), Value::Object(args.clone()));
        }
        Ok(())
    }
}

struct Broken;

#[async_trait::async_trait]
impl ResponseFilter for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn apply(
        &self,
        _path: &str,
        _args: &Map<String, Value>,
        _data: &mut Value,
    ) -> Result<(), AppError> {
        Err(AppError::Filter {
            name: "broken".into(),
            message: "cannot decorate".into(),
        })
    }
}

#[tokio::test]
async fn method_wide_filters_see_every_get_route() {
    let mut state = test_state();
    assert!(state.filters.register("get__stamp", Arc::new(Stamp("everywhere"))));
    assert!(state
        .filters
        .register("get_links__stamp", Arc::new(Stamp("links"))));
    let app = app(state);

    send(
        &app,
        "POST",
        "/links",
        Some(ALICE),
        Some(json!({"title": "t", "markdown": "x"})),
    )
    .await;

    let (_, health) = send(&app, "GET", "/healthz", None, None).await;
    assert_eq!(health["filters"], json!(["everywhere"]));

    let (_, link) = send(&app, "GET", "/links/1", None, None).await;
    assert_eq!(link["filters"], json!(["links", "everywhere"]));

    let (_, list) = send(&app, "GET", "/links", None, None).await;
    assert_eq!(list["filters"], json!(["links", "everywhere"]));

    let (_, rendered) = send(&app, "POST", "/render", None, Some(json!({"markdown": "x"}))).await;
    assert!(rendered.get("filters").is_none());
}

#[tokio::test]
async fn query_arguments_reach_filters() {
    let mut state = test_state();
    state.filters.register("get_links__echo", Arc::new(EchoArgs));
    let app = app(state);
    let (status, body) = send(&app, "GET", "/links?tag=rust&limit=5", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["args"], json!({"tag": "rust", "limit": 5}));
}

#[tokio::test]
async fn failing_filter_aborts_the_response() {
    let mut state = test_state();
    state.filters.register("get_links__broken", Arc::new(Broken));
    state.filters.register("get__stamp", Arc::new(Stamp("never")));
    let app = app(state);

    let (status, body) = send(&app, "GET", "/links", None, None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["errorCode"], json!(5001));
    assert!(body.get("links").is_none());
    assert!(body.get("filters").is_none());

    // routes outside the broken prefix are unaffected
    let (status, body) = send(&app, "GET", "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filters"], json!(["never"]));
}
