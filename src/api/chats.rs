//! Chat state, presence, read markers, edits and history queries.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::json;
use wagate_core::{
    error::GatewayError,
    jid,
    protocol::{ChatPresenceState, MessagePayload, OutgoingContent, ProtocolAction},
};
use wagate_store::{ChatFlag, MessageQuery};

use super::send::deliver;
use super::{api_err, bad_request, parse_body, ApiResult, ApiState};

#[derive(Debug, Deserialize)]
pub(super) struct ArchiveRequest {
    chat: String,
    #[serde(default = "default_true")]
    archive: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatRequest {
    chat: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct EditRequest {
    chat: String,
    message_id: String,
    text: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct RevokeRequest {
    chat: String,
    message_id: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct PresenceRequest {
    available: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatPresenceRequest {
    chat: String,
    state: ChatPresenceState,
}

#[derive(Debug, Deserialize)]
pub(super) struct ReadRequest {
    chat: String,
    /// Author of the messages; required for group chats.
    #[serde(default)]
    sender: Option<String>,
    message_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct HistoryQuery {
    chat: Option<String>,
    limit: Option<i64>,
    before: Option<i64>,
}

/// `POST /sessions/{name}/chat/archive`
pub(super) async fn archive(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<ArchiveRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    let handle = state.registry.handle(&name).map_err(api_err)?;
    let client = handle.connected_client().map_err(api_err)?;
    let chat = jid::parse_recipient(&request.chat).map_err(api_err)?;

    client
        .archive_chat(&chat, request.archive)
        .await
        .map_err(api_err)?;
    state
        .registry
        .store()
        .set_chat_flag(&handle.id, &chat, ChatFlag::Archived, request.archive)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({"chat": chat, "archived": request.archive})))
}

/// `POST /sessions/{name}/chat/delete`
pub(super) async fn delete_chat(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    let handle = state.registry.handle(&name).map_err(api_err)?;
    let client = handle.connected_client().map_err(api_err)?;
    let chat = jid::parse_recipient(&request.chat).map_err(api_err)?;

    client.delete_chat(&chat).await.map_err(api_err)?;
    state
        .registry
        .store()
        .delete_chat(&handle.id, &chat)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({"chat": chat, "deleted": true})))
}

/// `POST /sessions/{name}/chat/edit`
pub(super) async fn edit(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<EditRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    if request.message_id.is_empty() || request.text.trim().is_empty() {
        return Err(bad_request("message_id and text are required"));
    }
    let payload = MessagePayload {
        protocol: Some(ProtocolAction::Edit {
            target_id: request.message_id.clone(),
            text: request.text.clone(),
        }),
        ..Default::default()
    };
    let content = OutgoingContent::Edit {
        target_id: request.message_id,
        text: request.text,
    };
    deliver(&state, &name, &request.chat, content, payload).await
}

/// `POST /sessions/{name}/chat/revoke`: delete a sent message for everyone.
pub(super) async fn revoke(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<RevokeRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    if request.message_id.is_empty() {
        return Err(bad_request("message_id must not be empty"));
    }
    let payload = MessagePayload {
        protocol: Some(ProtocolAction::Revoke {
            target_id: request.message_id.clone(),
        }),
        ..Default::default()
    };
    let content = OutgoingContent::Revoke {
        target_id: request.message_id,
    };
    deliver(&state, &name, &request.chat, content, payload).await
}

/// `POST /sessions/{name}/presence`
pub(super) async fn presence(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<PresenceRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    let handle = state.registry.handle(&name).map_err(api_err)?;
    let client = handle.connected_client().map_err(api_err)?;
    client
        .send_presence(request.available)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({"available": request.available})))
}

/// `POST /sessions/{name}/chat/presence`: typing and recording indicators.
pub(super) async fn chat_presence(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<ChatPresenceRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    let handle = state.registry.handle(&name).map_err(api_err)?;
    let client = handle.connected_client().map_err(api_err)?;
    let chat = jid::parse_recipient(&request.chat).map_err(api_err)?;
    client
        .send_chat_presence(&chat, request.state)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({"chat": chat, "state": request.state})))
}

/// `POST /sessions/{name}/chat/read`
pub(super) async fn mark_read(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<ReadRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    if request.message_ids.is_empty() {
        return Err(bad_request("message_ids must not be empty"));
    }
    let handle = state.registry.handle(&name).map_err(api_err)?;
    let client = handle.connected_client().map_err(api_err)?;
    let chat = jid::parse_recipient(&request.chat).map_err(api_err)?;
    let sender = match request.sender.as_deref() {
        Some(s) => jid::parse_recipient(s).map_err(api_err)?,
        None if jid::is_group(&chat) => {
            return Err(api_err(GatewayError::InvalidRequest(
                "sender is required for group chats".into(),
            )))
        }
        None => chat.clone(),
    };

    client
        .mark_read(&chat, &sender, &request.message_ids)
        .await
        .map_err(api_err)?;
    state
        .registry
        .store()
        .set_chat_read(&handle.id, &chat, true)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({"chat": chat, "read": request.message_ids.len()})))
}

/// `GET /sessions/{name}/chats`
pub(super) async fn list(State(state): State<ApiState>, Path(name): Path<String>) -> ApiResult {
    let handle = state.registry.handle(&name).map_err(api_err)?;
    let chats = state
        .registry
        .store()
        .list_chats(&handle.id)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({ "chats": chats })))
}

/// `GET /sessions/{name}/messages?chat=&limit=&before=`, newest first.
pub(super) async fn messages(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    let handle = state.registry.handle(&name).map_err(api_err)?;
    let chat = query
        .chat
        .as_deref()
        .map(jid::parse_recipient)
        .transpose()
        .map_err(api_err)?;
    let filter = MessageQuery {
        chat,
        before: query.before,
        limit: query.limit,
    };
    let messages = state
        .registry
        .store()
        .list_messages(&handle.id, &filter)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({ "messages": messages })))
}

/// `GET /sessions/{name}/messages/{id}` with its media row, if any.
pub(super) async fn message(
    State(state): State<ApiState>,
    Path((name, id)): Path<(String, String)>,
) -> ApiResult {
    let handle = state.registry.handle(&name).map_err(api_err)?;
    let store = state.registry.store();
    let message = store
        .get_message(&handle.id, &id)
        .await
        .map_err(api_err)?
        .ok_or_else(|| api_err(GatewayError::NotFound(format!("message {id}"))))?;
    let media = store.get_media(&handle.id, &id).await.map_err(api_err)?;
    Ok(Json(json!({ "message": message, "media": media })))
}
