//! Core library for linkhub.  This module wires together the domain store,
//! the Markdown element pipeline, the response filter registry, two-factor
//! tokens and the double-submission guard behind an axum router.

mod config;
pub mod error;
pub mod filters;
pub mod guard;
pub mod markdown;
pub mod metadata;
pub mod metrics;
pub mod notify;
pub mod providers;
pub mod store;
pub mod twofactor;
pub mod util;

pub use config::{AppConfig, FileConfig};
pub use error::{AppError, ErrorResponse};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody, JsonRejection, QueryRejection},
    DefaultBodyLimit, Path, Query, State,
};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::filters::FilterRegistry;
use crate::guard::{MemoryCache, SubmissionGuard};
use crate::markdown::{MarkdownRenderer, MediaEmbedder};
use crate::metadata::{HttpMetadataSource, MetadataSource, OfflineMetadataSource};
use crate::metrics::Metrics;
use crate::notify::{ConfirmationNotifier, LogNotifier};
use crate::store::{is_plausible_email, Channel, LinkQuery, NewLink, Store};
use crate::twofactor::{ActionDescriptor, MemoryTokenStore, TwoFactor};

const MAX_MARKDOWN_CHARS: usize = 100_000;
const MAX_TITLE_CHARS: usize = 200;
const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

/// Internal application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub renderer: MarkdownRenderer,
    pub filters: FilterRegistry,
    pub two_factor: TwoFactor,
    pub guard: SubmissionGuard,
    pub notifier: Arc<dyn ConfirmationNotifier>,
    pub metrics: Arc<Metrics>,
    /// Maximum accepted raw request body size in bytes (None => axum default)
    pub max_request_bytes: Option<usize>,
    redirect_base: Option<String>,
    pdf_viewer_url: String,
}

impl AppState {
    /// Replace the confirmation channel (mail stand-in).
    pub fn with_notifier(mut self, notifier: Arc<dyn ConfirmationNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Rebuild the Markdown pipeline around a different metadata source.
    pub fn with_metadata_source(mut self, source: Arc<dyn MetadataSource>) -> Self {
        self.renderer = MarkdownRenderer::standard(
            self.redirect_base.clone(),
            MediaEmbedder::new(source, self.pdf_viewer_url.clone()),
        );
        self
    }
}

/// Assemble the application state from a parsed configuration.
pub fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let AppConfig {
        redirect_base,
        pdf_viewer_url,
        channels,
        sessions,
        response_filters,
        media_fetch,
        media_timeout_ms,
        token_ttl_secs,
        guard_ttl_secs,
        max_request_bytes,
    } = config;

    let metrics = Arc::new(Metrics::default());

    let store = Arc::new(Store::new());
    for channel in channels {
        store.add_channel(channel);
    }
    for (token, channel) in &sessions {
        store.add_session(token, channel);
    }
    if sessions.is_empty() {
        tracing::warn!("No sessions configured: authenticated endpoints will reject every request");
    }

    let source: Arc<dyn MetadataSource> = if media_fetch {
        Arc::new(
            HttpMetadataSource::new(Duration::from_millis(media_timeout_ms))
                .context("Failed to build HTTP client for metadata lookups")?,
        )
    } else {
        tracing::info!("Media metadata lookups disabled");
        Arc::new(OfflineMetadataSource)
    };
    let renderer = MarkdownRenderer::standard(
        redirect_base.clone(),
        MediaEmbedder::new(source, pdf_viewer_url.clone()),
    );

    let filters = FilterRegistry::standard(&response_filters, metrics.clone());
    tracing::info!(
        response_filters = filters.len(),
        element_filters = ?renderer.filter_names(),
        "filter chains ready"
    );

    Ok(AppState {
        store,
        renderer,
        filters,
        two_factor: TwoFactor::new(Arc::new(MemoryTokenStore::new()), token_ttl_secs),
        guard: SubmissionGuard::new(
            Arc::new(MemoryCache::new()),
            Duration::from_secs(guard_ttl_secs),
        ),
        notifier: Arc::new(LogNotifier),
        metrics,
        max_request_bytes,
        redirect_base,
        pdf_viewer_url,
    })
}

/// Build state from environment variables.  This function reads the
/// following variables:
///
/// * `LINKHUB_CONFIG` (optional) – path to a JSON configuration file.
/// * `LINKHUB_SESSIONS` (optional) – `token:channel` pairs, comma separated.
/// * `LINKHUB_RESPONSE_FILTERS` (optional) – enabled response filters.
///
/// See [`AppConfig::from_env`] for the rest.
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    Ok(build_state(config)?)
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    let router = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .route("/render", post(render_handler))
        .route("/links", get(list_links_handler).post(create_link_handler))
        .route(
            "/links/:id",
            get(get_link_handler).delete(delete_link_handler),
        )
        .route("/channel/email", put(change_email_handler))
        .route("/channel/sessions/revoke", post(revoke_sessions_handler))
        .route("/twofactor/:token", get(redeem_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(state)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let raw = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    if raw.len() < 7 || !raw[..6].eq_ignore_ascii_case("bearer") {
        return Err(AppError::Unauthorized);
    }
    let token = raw[6..].trim();
    if token.is_empty() {
        return Err(AppError::Unauthorized);
    }
    Ok(token.to_string())
}

/// Look the bearer token up in the session table.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Channel, AppError> {
    let token = extract_bearer_token(headers)?;
    state
        .store
        .session_channel(&token)
        .ok_or(AppError::Unauthorized)
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    match rejection {
        JsonRejection::BytesRejection(BytesRejection::FailedToBufferBody(
            FailedToBufferBody::LengthLimitError(_),
        )) => {
            tracing::warn!("request body exceeded limit");
            AppError::PayloadTooLarge("body exceeded limit".into())
        }
        other => AppError::Validation(other.body_text()),
    }
}

fn query_rejection(rejection: QueryRejection) -> AppError {
    AppError::Validation(rejection.body_text())
}

fn parse_id(raw: &str) -> Result<u64, AppError> {
    raw.parse()
        .map_err(|_| AppError::Validation(format!("invalid link id '{}'", raw)))
}

/// Serialize `payload`, run the response filters for this route over it and
/// wrap it as JSON.
async fn respond<T: Serialize>(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    args: Map<String, Value>,
    payload: &T,
    status: StatusCode,
) -> Result<Response, AppError> {
    let mut data = serde_json::to_value(payload)
        .map_err(|e| AppError::Storage(format!("failed to serialize response: {}", e)))?;
    state
        .filters
        .run(method.as_str(), uri.path(), &args, &mut data, &state.metrics)
        .await?;
    metrics::incr(&state.metrics.requests_total);
    Ok((status, Json(data)).into_response())
}

fn args_of<T: Serialize>(query: &T) -> Map<String, Value> {
    match serde_json::to_value(query) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

async fn issue_confirmation(
    state: &AppState,
    channel: &Channel,
    action: ActionDescriptor,
) -> Result<Value, AppError> {
    let summary = action.summary();
    let token = state
        .two_factor
        .create_token(std::slice::from_ref(&action))
        .await?;
    metrics::incr(&state.metrics.tokens_issued_total);
    state.notifier.notify(channel, &token, &summary);
    Ok(json!({
        "status": "confirmation_required",
        "action": summary,
        "expiresInSecs": state.two_factor.ttl_secs(),
    }))
}

#[derive(Debug, Deserialize)]
struct RenderRequest {
    markdown: String,
}

fn check_markdown(markdown: &str) -> Result<(), AppError> {
    if markdown.chars().count() > MAX_MARKDOWN_CHARS {
        return Err(AppError::Validation(format!(
            "markdown exceeds {} characters",
            MAX_MARKDOWN_CHARS
        )));
    }
    Ok(())
}

/// Handler for `/render`: Markdown preview through the element pipeline.
async fn render_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(json_rejection)?;
    check_markdown(&req.markdown)?;
    let output = state.renderer.render(&req.markdown).await;
    metrics::incr(&state.metrics.renders_total);
    respond(&state, &method, &uri, Map::new(), &output, StatusCode::OK).await
}

#[derive(Debug, Deserialize, Serialize)]
struct ListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
}

async fn list_links_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(query) = query.map_err(query_rejection)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {}",
            MAX_LIST_LIMIT
        )));
    }
    let links = state.store.list_links(&LinkQuery {
        channel: query.channel.clone(),
        tag: query.tag.as_deref().map(str::to_lowercase),
        limit,
    });
    let payload = json!({ "links": links });
    respond(&state, &method, &uri, args_of(&query), &payload, StatusCode::OK).await
}

#[derive(Debug, Deserialize, Serialize)]
struct CreateLinkRequest {
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    markdown: String,
    #[serde(default)]
    tags: Vec<String>,
}

impl CreateLinkRequest {
    fn validate(&self) -> Result<(), AppError> {
        let title_len = self.title.trim().chars().count();
        if title_len == 0 || title_len > MAX_TITLE_CHARS {
            return Err(AppError::Validation(format!(
                "title must be 1 to {} characters",
                MAX_TITLE_CHARS
            )));
        }
        if let Some(url) = &self.url {
            let lower = url.trim().to_ascii_lowercase();
            if !(lower.starts_with("http://") || lower.starts_with("https://")) {
                return Err(AppError::Validation("url must be http(s)".into()));
            }
        }
        check_markdown(&self.markdown)
    }
}

async fn create_link_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    payload: Result<Json<CreateLinkRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let channel = authenticate(&state, &headers)?;
    let Json(req) = payload.map_err(json_rejection)?;
    req.validate()?;
    if let Err(err) = state.guard.check("post_links", &(&channel.name, &req)) {
        metrics::incr(&state.metrics.duplicates_rejected_total);
        return Err(err);
    }

    let rendered = state.renderer.render(&req.markdown).await;
    metrics::incr(&state.metrics.renders_total);

    let mut tags: Vec<String> = Vec::new();
    for tag in req
        .tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .chain(rendered.tags.iter().cloned())
    {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    let link = state.store.insert_link(NewLink {
        channel: channel.name.clone(),
        title: req.title.trim().to_string(),
        url: req.url.as_deref().map(|u| u.trim().to_string()),
        markdown: req.markdown,
        html: rendered.html,
        tags,
        cover_image: rendered.cover_image,
        outline: rendered.outline,
    });
    tracing::info!(channel = %channel.name, link_id = link.id, "link created");
    respond(&state, &method, &uri, Map::new(), &link, StatusCode::CREATED).await
}

async fn get_link_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let link = state
        .store
        .link(id)
        .ok_or_else(|| AppError::NotFound(format!("link {}", id)))?;
    respond(&state, &method, &uri, Map::new(), &link, StatusCode::OK).await
}

/// Deleting a link needs confirmation through a two-factor token.
async fn delete_link_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let channel = authenticate(&state, &headers)?;
    let id = parse_id(&id)?;
    match state.store.link(id) {
        Some(link) if link.channel == channel.name => {}
        _ => return Err(AppError::NotFound(format!("link {}", id))),
    }
    let action = ActionDescriptor::DeleteLink {
        channel: channel.name.clone(),
        link_id: id,
    };
    let payload = issue_confirmation(&state, &channel, action).await?;
    respond(&state, &method, &uri, Map::new(), &payload, StatusCode::ACCEPTED).await
}

#[derive(Debug, Deserialize, Serialize)]
struct ChangeEmailRequest {
    email: String,
}

async fn change_email_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    payload: Result<Json<ChangeEmailRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let channel = authenticate(&state, &headers)?;
    let Json(req) = payload.map_err(json_rejection)?;
    let email = req.email.trim().to_string();
    if !is_plausible_email(&email) {
        return Err(AppError::Validation(format!(
            "invalid email address {}",
            email
        )));
    }
    if let Err(err) = state
        .guard
        .check("put_channel_email", &(&channel.name, &email))
    {
        metrics::incr(&state.metrics.duplicates_rejected_total);
        return Err(err);
    }
    let action = ActionDescriptor::ChangeEmail {
        channel: channel.name.clone(),
        email,
    };
    let payload = issue_confirmation(&state, &channel, action).await?;
    respond(&state, &method, &uri, Map::new(), &payload, StatusCode::ACCEPTED).await
}

async fn revoke_sessions_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let channel = authenticate(&state, &headers)?;
    if let Err(err) = state
        .guard
        .check("post_channel_sessions_revoke", &channel.name)
    {
        metrics::incr(&state.metrics.duplicates_rejected_total);
        return Err(err);
    }
    let action = ActionDescriptor::RevokeSessions {
        channel: channel.name.clone(),
    };
    let payload = issue_confirmation(&state, &channel, action).await?;
    respond(&state, &method, &uri, Map::new(), &payload, StatusCode::ACCEPTED).await
}

/// Redeem a two-factor token and run its actions.
async fn redeem_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Path(token): Path<String>,
) -> Result<Response, AppError> {
    let result = match state.two_factor.redeem(&token, state.store.as_ref()).await {
        Ok(result) => result,
        Err(err) => {
            if matches!(err, AppError::TokenNotFoundOrExpired) {
                metrics::incr(&state.metrics.tokens_rejected_total);
            }
            return Err(err);
        }
    };
    metrics::incr(&state.metrics.tokens_redeemed_total);
    respond(&state, &method, &uri, Map::new(), &result, StatusCode::OK).await
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
) -> Result<Response, AppError> {
    let payload = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "responseFilters": state.filters.filter_names(),
        "elementFilters": state.renderer.filter_names(),
    });
    respond(&state, &method, &uri, Map::new(), &payload, StatusCode::OK).await
}

/// Prometheus-style metrics exposition.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        state.metrics.render(),
    )
        .into_response()
}
