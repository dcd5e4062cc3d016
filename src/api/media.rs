//! Stored media: on-demand retry, streaming, and metadata.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use wagate_core::error::GatewayError;
use wagate_media::{is_local_url, stream_object};

use super::{api_err, ApiError, ApiResult, ApiState};

#[derive(Debug, Deserialize)]
pub(super) struct MessageRef {
    #[serde(rename = "messageId")]
    message_id: String,
}

/// `POST /sessions/{name}/media/retry?messageId=`
///
/// Answers as soon as the download is scheduled; its outcome shows up on
/// the media row.
pub(super) async fn retry(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<MessageRef>,
) -> ApiResult {
    let handle = state.registry.handle(&name).map_err(api_err)?;
    let client = handle.connected_client().map_err(api_err)?;
    state
        .registry
        .media()
        .spawn_retry(
            client,
            &handle.id,
            &query.message_id,
            handle.context().cancel.clone(),
        )
        .await
        .map_err(api_err)?;
    Ok(Json(json!({
        "message": "Media download retry initiated",
        "messageId": query.message_id,
    })))
}

/// `GET /sessions/{name}/media/stream?messageId=`
///
/// Objects behind a private endpoint are relayed; anything else is a 302.
pub(super) async fn stream(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<MessageRef>,
) -> Result<Response, ApiError> {
    let handle = state.registry.handle(&name).map_err(api_err)?;
    let media = state
        .registry
        .store()
        .get_media(&handle.id, &query.message_id)
        .await
        .map_err(api_err)?
        .ok_or_else(|| {
            api_err(GatewayError::NotFound(format!(
                "media for message {}",
                query.message_id
            )))
        })?;
    let url = match (&media.storage_url, media.downloaded) {
        (Some(url), true) => url.clone(),
        _ => {
            return Err(api_err(GatewayError::NotFound(format!(
                "media for message {} is not stored yet",
                query.message_id
            ))))
        }
    };

    if !is_local_url(&url) {
        return Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response());
    }

    debug!(session = %name, msg_id = %query.message_id, "proxying stored media");
    let object = stream_object(&state.http, &url, &media.mime_type)
        .await
        .map_err(api_err)?;
    let mut response = Response::new(Body::from_stream(object.stream));
    let headers = response.headers_mut();
    if let Ok(v) = object.content_type.parse() {
        headers.insert(header::CONTENT_TYPE, v);
    }
    if let Some(len) = object.content_length {
        headers.insert(header::CONTENT_LENGTH, len.into());
    }
    Ok(response)
}

/// `GET /sessions/{name}/media/{msg_id}`: the row plus a presigned URL.
pub(super) async fn info(
    State(state): State<ApiState>,
    Path((name, msg_id)): Path<(String, String)>,
) -> ApiResult {
    let handle = state.registry.handle(&name).map_err(api_err)?;
    let (media, url) = state
        .registry
        .media()
        .media_info(&handle.id, &msg_id)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({ "media": media, "url": url })))
}
