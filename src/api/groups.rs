//! Group management endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use wagate_core::{
    error::GatewayError, jid, protocol::ParticipantAction, traits::ProtocolClient,
};

use super::send::{send_text, TextRequest};
use super::{api_err, bad_request, parse_body, ApiError, ApiResult, ApiState};

#[derive(Debug, Deserialize)]
pub(super) struct CreateRequest {
    name: String,
    #[serde(default)]
    participants: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GroupQuery {
    jid: String,
    #[serde(default)]
    reset: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct GroupRequest {
    jid: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct NameRequest {
    jid: String,
    name: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct TopicRequest {
    jid: String,
    #[serde(default)]
    topic: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ParticipantsRequest {
    jid: String,
    participants: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct JoinRequest {
    /// Invite code or a full `https://chat.whatsapp.com/<code>` link.
    code: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct GroupSendRequest {
    jid: String,
    text: String,
}

fn live_client(state: &ApiState, name: &str) -> Result<Arc<dyn ProtocolClient>, ApiError> {
    let handle = state.registry.handle(name).map_err(api_err)?;
    handle.connected_client().map_err(api_err)
}

fn group_jid(raw: &str) -> Result<String, ApiError> {
    let jid = jid::parse_recipient(raw).map_err(api_err)?;
    if !jid::is_group(&jid) {
        return Err(api_err(GatewayError::InvalidJid(format!(
            "{raw} is not a group"
        ))));
    }
    Ok(jid)
}

fn member_jids(raw: &[String]) -> Result<Vec<String>, ApiError> {
    if raw.is_empty() {
        return Err(bad_request("participants must not be empty"));
    }
    raw.iter()
        .map(|p| jid::parse_recipient(p).map_err(api_err))
        .collect()
}

/// `POST /sessions/{name}/groups/create`
pub(super) async fn create(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    if request.name.trim().is_empty() {
        return Err(bad_request("group name must not be empty"));
    }
    let participants = member_jids(&request.participants)?;
    let client = live_client(&state, &name)?;
    let group = client
        .group_create(&request.name, &participants)
        .await
        .map_err(api_err)?;
    Ok(Json(json!(group)))
}

/// `GET /sessions/{name}/groups`
pub(super) async fn list(State(state): State<ApiState>, Path(name): Path<String>) -> ApiResult {
    let client = live_client(&state, &name)?;
    let groups = client.group_list().await.map_err(api_err)?;
    Ok(Json(json!({ "groups": groups })))
}

/// `GET /sessions/{name}/groups/info?jid=`
pub(super) async fn info(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<GroupQuery>,
) -> ApiResult {
    let jid = group_jid(&query.jid)?;
    let client = live_client(&state, &name)?;
    let group = client.group_info(&jid).await.map_err(api_err)?;
    Ok(Json(json!(group)))
}

/// `POST /sessions/{name}/groups/leave`
pub(super) async fn leave(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<GroupRequest>, JsonRejection>,
) -> ApiResult {
    let jid = group_jid(&parse_body(body)?.jid)?;
    let client = live_client(&state, &name)?;
    client.group_leave(&jid).await.map_err(api_err)?;
    Ok(Json(json!({"jid": jid, "left": true})))
}

/// `POST /sessions/{name}/groups/name`
pub(super) async fn set_name(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<NameRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    if request.name.trim().is_empty() {
        return Err(bad_request("group name must not be empty"));
    }
    let jid = group_jid(&request.jid)?;
    let client = live_client(&state, &name)?;
    client
        .group_set_name(&jid, &request.name)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({"jid": jid, "name": request.name})))
}

/// `POST /sessions/{name}/groups/topic`; an empty topic clears it.
pub(super) async fn set_topic(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<TopicRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    let jid = group_jid(&request.jid)?;
    let client = live_client(&state, &name)?;
    client
        .group_set_topic(&jid, &request.topic)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({"jid": jid, "topic": request.topic})))
}

/// `POST /sessions/{name}/groups/participants/{add|remove|promote|demote}`
pub(super) async fn participants(
    State(state): State<ApiState>,
    Path((name, action)): Path<(String, String)>,
    body: Result<Json<ParticipantsRequest>, JsonRejection>,
) -> ApiResult {
    let action = match action.as_str() {
        "add" => ParticipantAction::Add,
        "remove" => ParticipantAction::Remove,
        "promote" => ParticipantAction::Promote,
        "demote" => ParticipantAction::Demote,
        other => {
            return Err(bad_request(format!(
                "unknown action '{other}', expected add, remove, promote or demote"
            )))
        }
    };
    let request = parse_body(body)?;
    let jid = group_jid(&request.jid)?;
    let members = member_jids(&request.participants)?;
    let client = live_client(&state, &name)?;
    client
        .group_participants(&jid, action, &members)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({
        "jid": jid,
        "action": action,
        "participants": members,
    })))
}

/// `GET /sessions/{name}/groups/invite?jid=&reset=`
pub(super) async fn invite_link(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<GroupQuery>,
) -> ApiResult {
    let jid = group_jid(&query.jid)?;
    let client = live_client(&state, &name)?;
    let link = client
        .group_invite_link(&jid, query.reset)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({"jid": jid, "link": link})))
}

fn invite_code(raw: &str) -> &str {
    let raw = raw.trim().trim_end_matches('/');
    raw.rsplit('/').next().unwrap_or(raw)
}

/// `POST /sessions/{name}/groups/join`
pub(super) async fn join(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<JoinRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    let code = invite_code(&request.code);
    if code.is_empty() {
        return Err(bad_request("invite code must not be empty"));
    }
    let client = live_client(&state, &name)?;
    let jid = client.group_join(code).await.map_err(api_err)?;
    Ok(Json(json!({ "jid": jid })))
}

/// `POST /sessions/{name}/groups/send`: text to a group.
pub(super) async fn send(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<GroupSendRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    let jid = group_jid(&request.jid)?;
    let text = TextRequest {
        to: jid,
        text: request.text,
        quoted_id: None,
        quoted_sender: None,
    };
    send_text(&state, &name, text).await
}

#[cfg(test)]
mod tests {
    use super::invite_code;

    #[test]
    fn test_invite_code_accepts_links() {
        assert_eq!(invite_code("https://chat.whatsapp.com/AbC123"), "AbC123");
        assert_eq!(invite_code("AbC123"), "AbC123");
        assert_eq!(invite_code(" https://chat.whatsapp.com/AbC123/ "), "AbC123");
    }
}
