//! Outbound messaging endpoints.
//!
//! After the protocol acknowledges a send, the message is fed back through
//! the session's mailbox as a `from_me` event, so it is persisted and
//! broadcast as `message.sent` exactly like traffic sent from the phone.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Multipart, Path, Request, State},
    http::header,
    response::Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use wagate_core::{
    error::GatewayError,
    jid,
    protocol::{
        ContactPayload, LocationPayload, MediaAttachment, MediaKind, MessageInfo,
        MessagePayload, OutgoingContent, PollPayload, PollUpdatePayload, ProtocolAction,
        QuotedRef, ReactionPayload, RawEvent, SendReceipt,
    },
    traits::ProtocolClient,
};
use wagate_media::{MediaSource, SentMedia};

use super::{api_err, bad_request, parse_body, ApiError, ApiResult, ApiState};
use crate::registry::SessionHandle;

#[derive(Debug, Deserialize)]
pub(super) struct TextRequest {
    pub to: String,
    pub text: String,
    #[serde(default)]
    pub quoted_id: Option<String>,
    #[serde(default)]
    pub quoted_sender: Option<String>,
}

/// Media send body. Exactly one of `base64`, `url` or a multipart `file`.
#[derive(Debug, Default, Deserialize)]
pub(super) struct MediaRequest {
    #[serde(default)]
    to: String,
    base64: Option<String>,
    url: Option<String>,
    caption: Option<String>,
    file_name: Option<String>,
    mimetype: Option<String>,
    #[serde(default)]
    ptt: bool,
    #[serde(skip)]
    upload: Option<MultipartFile>,
}

#[derive(Debug)]
struct MultipartFile {
    data: Vec<u8>,
    mime: Option<String>,
    file_name: Option<String>,
}

impl MediaRequest {
    fn source(&mut self) -> Result<MediaSource, ApiError> {
        let provided = [self.upload.is_some(), self.base64.is_some(), self.url.is_some()]
            .iter()
            .filter(|p| **p)
            .count();
        if provided != 1 {
            return Err(bad_request("provide exactly one of 'file', 'base64' or 'url'"));
        }
        if let Some(file) = self.upload.take() {
            return Ok(MediaSource::Bytes {
                data: file.data,
                mime: file.mime,
                file_name: file.file_name,
            });
        }
        if let Some(b64) = self.base64.take() {
            return Ok(MediaSource::Base64(b64));
        }
        match self.url.take() {
            Some(url) => Ok(MediaSource::Url(url)),
            None => Err(bad_request("missing media source")),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct LocationRequest {
    to: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ContactRequest {
    to: String,
    #[serde(alias = "name")]
    display_name: String,
    /// Full vCard; built from `phone` when absent.
    #[serde(default)]
    vcard: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ReactionRequest {
    to: String,
    message_id: String,
    /// Empty string removes the reaction.
    #[serde(default)]
    emoji: String,
    #[serde(default)]
    from_me: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct PollRequest {
    to: String,
    name: String,
    options: Vec<String>,
    #[serde(default = "default_selectable")]
    selectable_count: u32,
}

fn default_selectable() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub(super) struct PollVoteRequest {
    to: String,
    poll_id: String,
    options: Vec<String>,
}

/// Feed an acknowledged outbound message into the session pipeline.
pub(super) async fn record_sent(
    handle: &SessionHandle,
    to: &str,
    receipt: &SendReceipt,
    payload: MessagePayload,
) {
    let info = MessageInfo {
        id: receipt.id.clone(),
        chat: to.to_string(),
        sender: handle.own_jid(),
        from_me: true,
        is_group: jid::is_group(to),
        timestamp: receipt.timestamp,
        is_edit: matches!(payload.protocol, Some(ProtocolAction::Edit { .. })),
        ..Default::default()
    };
    handle.mailbox().push(RawEvent::Message { info, payload }).await;
}

fn sent_json(receipt: &SendReceipt) -> Json<serde_json::Value> {
    Json(json!({
        "messageId": receipt.id,
        "timestamp": receipt.timestamp,
    }))
}

/// Resolve the session, its live client, and the normalized recipient.
pub(super) fn target(
    state: &ApiState,
    name: &str,
    to: &str,
) -> Result<(Arc<SessionHandle>, Arc<dyn ProtocolClient>, String), ApiError> {
    let handle = state.registry.handle(name).map_err(api_err)?;
    let client = handle.connected_client().map_err(api_err)?;
    let to = jid::parse_recipient(to).map_err(api_err)?;
    Ok((handle, client, to))
}

/// Send, record, and answer `{messageId, timestamp}`.
pub(super) async fn deliver(
    state: &ApiState,
    name: &str,
    to: &str,
    content: OutgoingContent,
    payload: MessagePayload,
) -> ApiResult {
    let (handle, client, to) = target(state, name, to)?;
    let receipt = client.send_message(&to, content).await.map_err(api_err)?;
    debug!(session = %name, msg_id = %receipt.id, "message sent");
    record_sent(&handle, &to, &receipt, payload).await;
    Ok(sent_json(&receipt))
}

/// `POST /sessions/{name}/send/text`
pub(super) async fn text(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<TextRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    send_text(&state, &name, request).await
}

pub(super) async fn send_text(state: &ApiState, name: &str, request: TextRequest) -> ApiResult {
    if request.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    let quoted = request.quoted_id.map(|id| QuotedRef {
        id,
        sender: request.quoted_sender.unwrap_or_default(),
    });
    let mut payload = MessagePayload::text(&request.text);
    payload.quoted = quoted.clone();
    let content = OutgoingContent::Text {
        body: request.text,
        quoted,
    };
    deliver(state, name, &request.to, content, payload).await
}

/// `POST /sessions/{name}/send/{image|audio|video|document|sticker}`
///
/// Accepts JSON (`base64` or `url`) or `multipart/form-data` with a `file` part.
pub(super) async fn media(
    State(state): State<ApiState>,
    Path((name, kind)): Path<(String, String)>,
    req: Request,
) -> ApiResult {
    let kind = MediaKind::parse(&kind)
        .ok_or_else(|| api_err(GatewayError::NotFound(format!("send type '{kind}'"))))?;
    let mut request = read_media_request(&state, req).await?;
    let source = request.source()?;
    let (handle, client, to) = target(&state, &name, &request.to)?;

    let resolved = state.fetcher.resolve(source).await.map_err(api_err)?;
    let mime = request
        .mimetype
        .take()
        .or(resolved.mime)
        .unwrap_or_else(|| kind.default_mime().to_string());
    let file_name = request.file_name.take().or(resolved.file_name);
    let ptt = request.ptt && kind == MediaKind::Audio;

    let upload = client
        .upload(resolved.data.clone(), kind)
        .await
        .map_err(api_err)?;
    let content = OutgoingContent::Media {
        kind,
        upload: upload.clone(),
        mimetype: mime.clone(),
        caption: request.caption.clone(),
        file_name: file_name.clone(),
        ptt,
    };
    let receipt = client.send_message(&to, content).await.map_err(api_err)?;

    // Keep our own copy before the row is recorded; recording never
    // overwrites a stored object.
    let captured = state
        .registry
        .media()
        .capture_sent(SentMedia {
            session_id: handle.id.clone(),
            msg_id: receipt.id.clone(),
            chat_jid: to.clone(),
            sender_jid: handle.own_jid(),
            kind,
            mime_type: mime.clone(),
            file_name: file_name.clone(),
            data: resolved.data,
        })
        .await;
    if let Err(e) = captured {
        warn!(session = %name, msg_id = %receipt.id, "could not keep sent media: {e}");
    }

    let attachment = MediaAttachment {
        direct_path: upload.direct_path,
        media_key: upload.media_key,
        file_sha256: upload.file_sha256,
        file_enc_sha256: upload.file_enc_sha256,
        file_length: upload.file_length,
        mimetype: Some(mime),
        file_name,
        caption: request.caption,
        ptt,
        ..Default::default()
    };
    record_sent(&handle, &to, &receipt, media_payload(kind, attachment)).await;
    Ok(sent_json(&receipt))
}

fn media_payload(kind: MediaKind, attachment: MediaAttachment) -> MessagePayload {
    let mut payload = MessagePayload::default();
    match kind {
        MediaKind::Image => payload.image = Some(attachment),
        MediaKind::Video => payload.video = Some(attachment),
        MediaKind::Audio => payload.audio = Some(attachment),
        MediaKind::Document => payload.document = Some(attachment),
        MediaKind::Sticker => payload.sticker = Some(attachment),
    }
    payload
}

async fn read_media_request(state: &ApiState, req: Request) -> Result<MediaRequest, ApiError> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if !is_multipart {
        let body = Json::<MediaRequest>::from_request(req, state).await;
        return parse_body(body);
    }

    let mut multipart = Multipart::from_request(req, state)
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {e}")))?;
    let mut request = MediaRequest::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart field: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let mime = field.content_type().map(str::to_string);
            let file_name = field.file_name().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| bad_request(format!("could not read file: {e}")))?;
            request.upload = Some(MultipartFile {
                data: data.to_vec(),
                mime,
                file_name,
            });
            continue;
        }
        let value = field
            .text()
            .await
            .map_err(|e| bad_request(format!("could not read field '{name}': {e}")))?;
        match name.as_str() {
            "to" => request.to = value,
            "caption" => request.caption = Some(value),
            "file_name" | "filename" => request.file_name = Some(value),
            "mimetype" => request.mimetype = Some(value),
            "ptt" => request.ptt = matches!(value.as_str(), "true" | "1"),
            "base64" => request.base64 = Some(value),
            "url" => request.url = Some(value),
            _ => debug!(field = %name, "ignoring unknown multipart field"),
        }
    }
    Ok(request)
}

/// `POST /sessions/{name}/send/location`
pub(super) async fn location(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<LocationRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    if !(-90.0..=90.0).contains(&request.latitude) || !(-180.0..=180.0).contains(&request.longitude)
    {
        return Err(bad_request("latitude or longitude out of range"));
    }
    let location = LocationPayload {
        latitude: request.latitude,
        longitude: request.longitude,
        name: request.name,
        address: request.address,
    };
    let payload = MessagePayload {
        location: Some(location.clone()),
        ..Default::default()
    };
    deliver(
        &state,
        &name,
        &request.to,
        OutgoingContent::Location(location),
        payload,
    )
    .await
}

fn build_vcard(name: &str, phone: &str) -> String {
    format!(
        "BEGIN:VCARD\nVERSION:3.0\nFN:{name}\nTEL;type=CELL;type=VOICE;waid={phone}:+{phone}\nEND:VCARD"
    )
}

/// `POST /sessions/{name}/send/contact`
pub(super) async fn contact(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<ContactRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    if request.display_name.trim().is_empty() {
        return Err(bad_request("display_name must not be empty"));
    }
    let vcard = match (request.vcard, request.phone) {
        (Some(vcard), _) if !vcard.trim().is_empty() => vcard,
        (_, Some(phone)) => {
            let phone = jid::normalize_phone(&phone).map_err(api_err)?;
            build_vcard(&request.display_name, &phone)
        }
        _ => return Err(bad_request("provide 'vcard' or 'phone'")),
    };
    let contact = ContactPayload {
        display_name: request.display_name,
        vcard,
    };
    let payload = MessagePayload {
        contact: Some(contact.clone()),
        ..Default::default()
    };
    deliver(
        &state,
        &name,
        &request.to,
        OutgoingContent::Contact(contact),
        payload,
    )
    .await
}

/// `POST /sessions/{name}/send/reaction`
pub(super) async fn reaction(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<ReactionRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    if request.message_id.is_empty() {
        return Err(bad_request("message_id must not be empty"));
    }
    let chat = jid::parse_recipient(&request.to).map_err(api_err)?;
    let payload = MessagePayload {
        reaction: Some(ReactionPayload {
            target_id: request.message_id.clone(),
            text: request.emoji.clone(),
        }),
        ..Default::default()
    };
    let content = OutgoingContent::Reaction {
        chat,
        target_id: request.message_id,
        target_from_me: request.from_me,
        emoji: request.emoji,
    };
    deliver(&state, &name, &request.to, content, payload).await
}

/// `POST /sessions/{name}/send/poll`
pub(super) async fn poll(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<PollRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    if request.name.trim().is_empty() {
        return Err(bad_request("poll name must not be empty"));
    }
    if request.options.len() < 2 {
        return Err(bad_request("a poll needs at least two options"));
    }
    let selectable = request.selectable_count.clamp(1, request.options.len() as u32);
    let poll = PollPayload {
        name: request.name,
        options: request.options,
        selectable_count: selectable,
    };
    let payload = MessagePayload {
        poll: Some(poll.clone()),
        ..Default::default()
    };
    deliver(&state, &name, &request.to, OutgoingContent::Poll(poll), payload).await
}

/// `POST /sessions/{name}/send/poll/vote`
pub(super) async fn poll_vote(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Result<Json<PollVoteRequest>, JsonRejection>,
) -> ApiResult {
    let request = parse_body(body)?;
    if request.poll_id.is_empty() {
        return Err(bad_request("poll_id must not be empty"));
    }
    let payload = MessagePayload {
        poll_update: Some(PollUpdatePayload {
            poll_id: request.poll_id.clone(),
            selected: request.options.clone(),
        }),
        ..Default::default()
    };
    let content = OutgoingContent::PollVote {
        poll_id: request.poll_id,
        options: request.options,
    };
    deliver(&state, &name, &request.to, content, payload).await
}
