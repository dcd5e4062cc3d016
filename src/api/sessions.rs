//! Session lifecycle endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use wagate_channels::qr;
use wagate_core::records::SessionStatus;

use super::{api_err, parse_body, ApiError, ApiResult, ApiState};

#[derive(Debug, Deserialize)]
pub(super) struct PairRequest {
    phone: String,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct QrQuery {
    format: Option<String>,
}

/// `GET /sessions`
pub(super) async fn list(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "sessions": state.registry.list() }))
}

/// `POST /sessions/{name}/create`
pub(super) async fn create(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let session = state.registry.create(&name).await.map_err(api_err)?;
    info!(session = %name, "session created via API");
    Ok((StatusCode::CREATED, Json(json!(session))))
}

/// `DELETE /sessions/{name}/delete`
pub(super) async fn remove(State(state): State<ApiState>, Path(name): Path<String>) -> ApiResult {
    state.registry.delete(&name).await.map_err(api_err)?;
    Ok(Json(json!({"message": format!("session '{name}' deleted")})))
}

/// `GET /sessions/{name}/info`
pub(super) async fn info(State(state): State<ApiState>, Path(name): Path<String>) -> ApiResult {
    let session = state.registry.get(&name).map_err(api_err)?;
    Ok(Json(json!(session)))
}

/// `POST /sessions/{name}/connect`
pub(super) async fn connect(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult {
    let outcome = state.registry.connect(&name).await.map_err(api_err)?;
    let message = match (outcome.session.status, outcome.awaiting_qr) {
        (SessionStatus::Connected, _) => "session already connected",
        (_, true) => "connecting; fetch the QR code to pair",
        (_, false) => "connecting",
    };
    Ok(Json(json!({
        "message": message,
        "status": outcome.session.status,
    })))
}

/// `GET /sessions/{name}/qr?format=json|image`
pub(super) async fn qr(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<QrQuery>,
) -> Result<Response, ApiError> {
    let session = state.registry.get(&name).map_err(api_err)?;
    if session.qr_code.is_empty() {
        let message = if session.status == SessionStatus::Connected {
            "session already connected"
        } else {
            "no QR code available; call connect first"
        };
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": message, "status": session.status})),
        ));
    }

    match query.format.as_deref().unwrap_or("json") {
        "image" | "png" => {
            let png = qr::render_png(&session.qr_code).map_err(api_err)?;
            Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
        }
        "json" => {
            let data_url = qr::png_data_url(&session.qr_code).map_err(api_err)?;
            Ok(Json(json!({
                "qr": session.qr_code,
                "qr_base64": data_url,
                "status": session.status,
            }))
            .into_response())
        }
        other => Err(super::bad_request(format!(
            "unknown format '{other}', expected 'json' or 'image'"
        ))),
    }
}

/// `POST /sessions/{name}/logout`
pub(super) async fn logout(State(state): State<ApiState>, Path(name): Path<String>) -> ApiResult {
    let session = state.registry.logout(&name).await.map_err(api_err)?;
    Ok(Json(json!({
        "message": "logged out",
        "status": session.status,
    })))
}

/// `POST /sessions/{name}/restart`
pub(super) async fn restart(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult {
    let outcome = state.registry.restart(&name).await.map_err(api_err)?;
    Ok(Json(json!({
        "message": "session restarted",
        "status": outcome.session.status,
    })))
}

/// `POST /sessions/{name}/pair` with `{phone}`; answers the code to type on the phone.
pub(super) async fn pair(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<PairRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    let code = state
        .registry
        .pair_phone(&name, &request.phone)
        .await
        .map_err(api_err)?;
    Ok(Json(json!({ "code": code })))
}
