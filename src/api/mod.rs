//! HTTP API: session lifecycle, messaging, webhooks, media and live events.
//!
//! Every route except `/health` requires the configured key in the `apikey`
//! header or query parameter. Handlers answer `{"error": ...}` with the
//! status mapped from [`GatewayError::status_code`].

mod chats;
mod events;
mod groups;
mod media;
mod send;
mod sessions;
mod webhooks;

#[cfg(test)]
mod tests;

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use wagate_core::{config::Config, error::GatewayError};
use wagate_media::MediaFetcher;

use crate::registry::Registry;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    registry: Arc<Registry>,
    fetcher: MediaFetcher,
    /// Used to relay objects stored behind a private endpoint.
    http: reqwest::Client,
    api_key: Option<String>,
    allow_loopback: bool,
    keepalive: Duration,
    uptime: Instant,
}

impl ApiState {
    pub fn new(registry: Arc<Registry>, config: &Config) -> Result<Self, GatewayError> {
        let api_key = if config.api.api_key.is_empty() {
            None
        } else {
            Some(config.api.api_key.clone())
        };
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            registry,
            fetcher: MediaFetcher::new(&config.media)?,
            http,
            api_key,
            allow_loopback: config.webhook.allow_loopback,
            keepalive: Duration::from_secs(config.sse.keepalive_secs.max(1)),
            uptime: Instant::now(),
        })
    }
}

type ApiError = (StatusCode, Json<Value>);
type ApiResult = Result<Json<Value>, ApiError>;

/// Render a domain error. Server-side failures are logged.
fn api_err(e: GatewayError) -> ApiError {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("request failed: {e}");
    }
    (status, Json(json!({"error": e.to_string()})))
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": message.into()})),
    )
}

/// Unwrap a JSON body, turning decode failures into 400s.
fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v)
        .map_err(|e| bad_request(format!("invalid request: {e}")))
}

/// Constant-time string comparison to prevent timing attacks on key validation.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check the API key. Returns `None` if authorized, `Some(response)` if rejected.
fn check_auth(
    headers: &HeaderMap,
    query: Option<&str>,
    api_key: &Option<String>,
) -> Option<ApiError> {
    let key = api_key.as_ref()?;

    let from_header = headers
        .get("apikey")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let provided = from_header.or_else(|| {
        query.and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(k, _)| k == "apikey")
                .map(|(_, v)| v.into_owned())
        })
    });

    match provided {
        Some(token) if constant_time_eq(&token, key) => None,
        Some(_) => Some((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid api key"})),
        )),
        None => Some((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing api key"})),
        )),
    }
}

async fn require_api_key(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    if let Some(err) = check_auth(req.headers(), req.uri().query(), &state.api_key) {
        warn!(path = %req.uri().path(), "rejected unauthenticated request");
        return err.into_response();
    }
    next.run(req).await
}

/// `GET /health`: liveness plus a few counters. Never requires a key.
async fn health(State(state): State<ApiState>) -> Json<Value> {
    let registry = &state.registry;
    let hub = registry.dispatcher().hub();
    let webhooks = registry.dispatcher().webhooks().stats().snapshot();
    Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime.elapsed().as_secs(),
        "backend": registry.backend(),
        "sessions": registry.len(),
        "connected": registry.connected_count(),
        "webhooks": webhooks,
        "sse": {
            "clients": hub.total_clients(),
            "dropped": hub.dropped(),
        },
    }))
}

/// Build the axum router with shared state.
pub fn build_router(state: ApiState, max_body_bytes: usize) -> Router {
    let session = Router::new()
        .route("/create", post(sessions::create))
        .route("/delete", delete(sessions::remove))
        .route("/info", get(sessions::info))
        .route("/connect", post(sessions::connect))
        .route("/qr", get(sessions::qr))
        .route("/logout", post(sessions::logout))
        .route("/restart", post(sessions::restart))
        .route("/pair", post(sessions::pair))
        .route("/presence", post(chats::presence))
        .route("/send/text", post(send::text))
        .route("/send/location", post(send::location))
        .route("/send/contact", post(send::contact))
        .route("/send/reaction", post(send::reaction))
        .route("/send/poll", post(send::poll))
        .route("/send/poll/vote", post(send::poll_vote))
        .route("/send/{kind}", post(send::media))
        .route("/chat/archive", post(chats::archive))
        .route("/chat/delete", post(chats::delete_chat))
        .route("/chat/edit", post(chats::edit))
        .route("/chat/revoke", post(chats::revoke))
        .route("/chat/presence", post(chats::chat_presence))
        .route("/chat/read", post(chats::mark_read))
        .route("/chats", get(chats::list))
        .route("/messages", get(chats::messages))
        .route("/messages/{id}", get(chats::message))
        .route("/groups", get(groups::list))
        .route("/groups/create", post(groups::create))
        .route("/groups/info", get(groups::info))
        .route("/groups/leave", post(groups::leave))
        .route("/groups/name", post(groups::set_name))
        .route("/groups/topic", post(groups::set_topic))
        .route("/groups/participants/{action}", post(groups::participants))
        .route("/groups/invite", get(groups::invite_link))
        .route("/groups/join", post(groups::join))
        .route("/groups/send", post(groups::send))
        .route("/webhook", post(webhooks::create).get(webhooks::list))
        .route(
            "/webhook/{id}",
            get(webhooks::get_one)
                .put(webhooks::update)
                .delete(webhooks::remove),
        )
        .route("/webhook/{id}/test", post(webhooks::test))
        .route("/media/retry", post(media::retry))
        .route("/media/stream", get(media::stream))
        .route("/media/{msg_id}", get(media::info))
        .route("/sse/events", get(events::subscribe));

    let authed = Router::new()
        .route("/sessions", get(sessions::list))
        .nest("/sessions/{name}", session)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(authed)
        .layer(axum::extract::DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Start the API server and run it until `shutdown` fires.
pub async fn serve(
    config: &Config,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<(), GatewayError> {
    let app = build_router(state, config.api.max_body_mb.max(1) * 1024 * 1024);
    let addr = format!("{}:{}", config.api.host, config.api.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::Config(format!("API server failed to bind to {addr}: {e}")))?;

    info!("API server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(GatewayError::Io)?;
    info!("API server stopped");
    Ok(())
}
