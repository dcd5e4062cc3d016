//! Webhook subscription CRUD and test pings.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use wagate_core::{
    error::GatewayError,
    event::{validate_filter, Envelope, EventKind},
};
use wagate_dispatch::validate_webhook_url;
use wagate_store::WebhookUpdate;

use super::{api_err, bad_request, parse_body, ApiError, ApiResult, ApiState};

#[derive(Debug, Deserialize)]
pub(super) struct CreateRequest {
    url: String,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    secret: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Partial update. `"secret": ""` clears the secret.
#[derive(Debug, Deserialize)]
pub(super) struct UpdateRequest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    events: Option<Vec<String>>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    secret: Option<String>,
}

fn check_events(events: &[String]) -> Result<(), ApiError> {
    validate_filter(events).map_err(bad_request)
}

fn session_id(state: &ApiState, name: &str) -> Result<String, ApiError> {
    Ok(state.registry.handle(name).map_err(api_err)?.id.clone())
}

/// `POST /sessions/{name}/webhook`
pub(super) async fn create(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = parse_body(body)?;
    let sid = session_id(&state, &name)?;
    check_events(&request.events)?;
    let url = validate_webhook_url(&request.url, state.allow_loopback)
        .await
        .map_err(api_err)?;

    let hook = state
        .registry
        .store()
        .create_webhook(
            &sid,
            &url,
            &request.events,
            request.enabled,
            request.secret.as_deref(),
        )
        .await
        .map_err(api_err)?;
    info!(session = %name, webhook = %hook.id, url = %hook.url, "webhook registered");
    Ok((StatusCode::CREATED, Json(json!(hook))))
}

/// `GET /sessions/{name}/webhook`
pub(super) async fn list(State(state): State<ApiState>, Path(name): Path<String>) -> ApiResult {
    let sid = session_id(&state, &name)?;
    let hooks = state
        .registry
        .store()
        .list_webhooks(&sid)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({ "webhooks": hooks })))
}

/// `GET /sessions/{name}/webhook/{id}`
pub(super) async fn get_one(
    State(state): State<ApiState>,
    Path((name, id)): Path<(String, String)>,
) -> ApiResult {
    let sid = session_id(&state, &name)?;
    let hook = state
        .registry
        .store()
        .get_webhook(&sid, &id)
        .await
        .map_err(api_err)?
        .ok_or_else(|| api_err(GatewayError::NotFound(format!("webhook {id}"))))?;
    Ok(Json(json!(hook)))
}

/// `PUT /sessions/{name}/webhook/{id}`
pub(super) async fn update(
    State(state): State<ApiState>,
    Path((name, id)): Path<(String, String)>,
    body: Result<Json<UpdateRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    let sid = session_id(&state, &name)?;
    if let Some(events) = &request.events {
        check_events(events)?;
    }
    let url = match &request.url {
        Some(raw) => Some(
            validate_webhook_url(raw, state.allow_loopback)
                .await
                .map_err(api_err)?,
        ),
        None => None,
    };
    let update = WebhookUpdate {
        url,
        events: request.events,
        enabled: request.enabled,
        secret: request
            .secret
            .map(|s| if s.is_empty() { None } else { Some(s) }),
    };
    let hook = state
        .registry
        .store()
        .update_webhook(&sid, &id, &update)
        .await
        .map_err(api_err)?
        .ok_or_else(|| api_err(GatewayError::NotFound(format!("webhook {id}"))))?;
    Ok(Json(json!(hook)))
}

/// `DELETE /sessions/{name}/webhook/{id}`
pub(super) async fn remove(
    State(state): State<ApiState>,
    Path((name, id)): Path<(String, String)>,
) -> ApiResult {
    let sid = session_id(&state, &name)?;
    let deleted = state
        .registry
        .store()
        .delete_webhook(&sid, &id)
        .await
        .map_err(api_err)?;
    if !deleted {
        return Err(api_err(GatewayError::NotFound(format!("webhook {id}"))));
    }
    info!(session = %name, webhook = %id, "webhook removed");
    Ok(Json(json!({"message": "webhook deleted"})))
}

/// `POST /sessions/{name}/webhook/{id}/test`: one synchronous `webhook.test` delivery.
pub(super) async fn test(
    State(state): State<ApiState>,
    Path((name, id)): Path<(String, String)>,
) -> ApiResult {
    let sid = session_id(&state, &name)?;
    let hook = state
        .registry
        .store()
        .get_webhook(&sid, &id)
        .await
        .map_err(api_err)?
        .ok_or_else(|| api_err(GatewayError::NotFound(format!("webhook {id}"))))?;

    let envelope = Envelope::new(
        EventKind::WebhookTest,
        &sid,
        json!({"session": name, "webhookId": hook.id}),
    );
    let status = state
        .registry
        .dispatcher()
        .webhooks()
        .send_test(&hook, &envelope)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({
        "status": status,
        "ok": (200..300).contains(&status),
    })))
}
