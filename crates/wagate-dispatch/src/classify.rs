//! Raw protocol event -> domain event name, payload, and normalized records.

use chrono::{TimeZone, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;
use wagate_core::{
    event::EventKind,
    protocol::{MessageInfo, MessagePayload, ProtocolAction, RawEvent, ReceiptType},
    records::{Direction, MediaRecord, MessageRecord, MessageStatus, MessageType},
};

/// Domain event name for a raw event, or `None` for events that are dropped.
pub fn event_kind(event: &RawEvent) -> Option<EventKind> {
    use EventKind as K;
    use RawEvent as R;
    Some(match event {
        R::Connected => K::SessionConnected,
        R::Disconnected => K::SessionDisconnected,
        R::LoggedOut { .. } => K::SessionLoggedOut,
        R::ConnectFailure { .. } => K::SessionConnectFailure,
        R::StreamReplaced => K::SessionStreamReplaced,
        R::StreamError { .. } => K::SessionStreamError,
        R::TemporaryBan { .. } => K::SessionTemporaryBan,
        R::ClientOutdated => K::SessionClientOutdated,
        R::KeepAliveTimeout { .. } => K::SessionKeepaliveTimeout,
        R::KeepAliveRestored => K::SessionKeepaliveRestored,
        R::PairSuccess { .. } => K::SessionPairSuccess,
        R::PairError { .. } => K::SessionPairError,

        R::Message { info, payload } => message_kind(info, payload),
        R::Receipt { .. } => K::MessageReceipt,
        R::UndecryptableMessage { .. } => K::MessageUndecryptable,
        R::MediaRetry { .. } => K::MessageMediaRetry,

        R::Presence { .. } => K::PresenceUpdate,
        R::ChatPresence { .. } => K::ChatPresence,

        R::HistorySync { .. } => K::HistorySync,
        R::OfflineSyncPreview { .. } => K::SyncOfflinePreview,
        R::OfflineSyncCompleted { .. } => K::SyncOfflineCompleted,
        R::AppState { .. } => K::SyncAppState,
        R::AppStateSyncComplete { .. } => K::SyncAppStateComplete,

        R::PushName { .. } => K::ContactPushName,
        R::Picture { .. } => K::ContactPicture,
        R::ContactUpdate { .. } => K::ContactUpdate,
        R::BusinessName { .. } => K::ContactBusinessName,
        R::UserAbout { .. } => K::ContactAbout,
        R::IdentityChange { .. } => K::PrivacyIdentityChange,
        R::Blocklist { .. } => K::PrivacyBlocklist,
        R::PrivacySettings { .. } => K::PrivacySettings,

        R::CallOffer(_) => K::CallOffer,
        R::CallOfferNotice { .. } => K::CallOfferNotice,
        R::CallAccept(_) => K::CallAccept,
        R::CallPreAccept(_) => K::CallPreAccept,
        R::CallReject(_) => K::CallReject,
        R::CallTerminate { .. } => K::CallTerminate,
        R::CallTransport(_) => K::CallTransport,
        R::CallRelayLatency { .. } => K::CallRelayLatency,

        R::GroupInfo {
            join,
            leave,
            promote,
            demote,
            ..
        } => {
            if join.is_empty() && leave.is_empty() && promote.is_empty() && demote.is_empty() {
                K::GroupUpdate
            } else {
                K::GroupParticipants
            }
        }
        R::JoinedGroup { .. } => K::GroupJoined,

        R::NewsletterJoin { .. } => K::NewsletterJoin,
        R::NewsletterLeave { .. } => K::NewsletterLeave,
        R::NewsletterMuteChange { .. } => K::NewsletterMuteChange,
        R::NewsletterLiveUpdate { .. } => K::NewsletterLiveUpdate,

        R::Archive { .. } => K::ChatArchive,
        R::Pin { .. } => K::ChatPin,
        R::Mute { .. } => K::ChatMute,
        R::Star { .. } => K::ChatStar,
        R::DeleteForMe { .. } => K::ChatDeleteForMe,
        R::DeleteChat { .. } => K::ChatDelete,
        R::ClearChat { .. } => K::ChatClear,
        R::MarkChatAsRead { .. } => K::ChatMarkAsRead,
        R::LabelEdit { .. } => K::ChatLabelEdit,
        R::LabelAssociationChat { .. } => K::ChatLabelAssociation,

        R::Unknown { .. } => return None,
    })
}

/// Message events split by what the message does.
pub fn message_kind(info: &MessageInfo, payload: &MessagePayload) -> EventKind {
    match &payload.protocol {
        Some(ProtocolAction::Revoke { .. }) => EventKind::MessageDeleted,
        Some(ProtocolAction::Edit { .. }) => EventKind::MessageEdited,
        None if payload.reaction.is_some() => EventKind::MessageReaction,
        None if info.from_me => EventKind::MessageSent,
        None => EventKind::MessageReceived,
    }
}

/// `{type, content}` of a message body, in the fixed precedence order.
pub fn normalize(payload: &MessagePayload) -> Option<(MessageType, String)> {
    if let Some(text) = &payload.conversation {
        return Some((MessageType::Text, text.clone()));
    }
    if let Some(text) = &payload.extended_text {
        return Some((MessageType::Text, text.clone()));
    }
    let caption = |m: &wagate_core::protocol::MediaAttachment| m.caption.clone().unwrap_or_default();
    if let Some(m) = &payload.image {
        return Some((MessageType::Image, caption(m)));
    }
    if let Some(m) = &payload.video {
        return Some((MessageType::Video, caption(m)));
    }
    if let Some(m) = &payload.audio {
        return Some((MessageType::Audio, caption(m)));
    }
    if let Some(m) = &payload.document {
        let content = m
            .caption
            .clone()
            .or_else(|| m.file_name.clone())
            .unwrap_or_default();
        return Some((MessageType::Document, content));
    }
    if let Some(m) = &payload.sticker {
        return Some((MessageType::Sticker, caption(m)));
    }
    if let Some(loc) = &payload.location {
        let content = loc
            .name
            .clone()
            .unwrap_or_else(|| format!("{},{}", loc.latitude, loc.longitude));
        return Some((MessageType::Location, content));
    }
    if let Some(c) = &payload.contact {
        return Some((MessageType::Contact, c.display_name.clone()));
    }
    if let Some(r) = &payload.reaction {
        return Some((MessageType::Reaction, r.text.clone()));
    }
    if let Some(p) = &payload.poll {
        return Some((MessageType::Poll, p.name.clone()));
    }
    if let Some(p) = &payload.poll_update {
        return Some((MessageType::PollUpdate, p.poll_id.clone()));
    }
    None
}

/// Build the persisted row for a message. `None` for bodies with no known content.
/// An edit becomes its own row pointing at the message it changes.
pub fn message_record(
    session_id: &str,
    info: &MessageInfo,
    payload: &MessagePayload,
    raw: Option<String>,
) -> Option<MessageRecord> {
    let (msg_type, content, edit_target_id) = match &payload.protocol {
        Some(ProtocolAction::Edit { target_id, text }) => {
            (MessageType::Text, text.clone(), Some(target_id.clone()))
        }
        _ => {
            let (msg_type, content) = normalize(payload)?;
            (msg_type, content, None)
        }
    };
    Some(MessageRecord {
        session_id: session_id.to_string(),
        message_id: info.id.clone(),
        chat_jid: info.chat.clone(),
        sender_jid: info.sender.clone(),
        timestamp: info.timestamp,
        push_name: info.push_name.clone(),
        msg_type,
        media_type: payload.media().map(|(k, _)| k.as_str().to_string()),
        content,
        from_me: info.from_me,
        is_group: info.is_group,
        is_ephemeral: info.is_ephemeral,
        is_view_once: info.is_view_once,
        is_edit: info.is_edit || edit_target_id.is_some(),
        edit_target_id,
        quoted_id: payload.quoted.as_ref().map(|q| q.id.clone()),
        quoted_sender: payload.quoted.as_ref().map(|q| q.sender.clone()),
        status: if info.from_me {
            MessageStatus::Sent
        } else {
            MessageStatus::Delivered
        },
        raw,
    })
}

/// Pending media row for a message that carries a downloadable attachment.
pub fn media_record(
    session_id: &str,
    info: &MessageInfo,
    payload: &MessagePayload,
) -> Option<MediaRecord> {
    let (kind, m) = payload.media()?;
    let created_at = Utc
        .timestamp_opt(info.timestamp, 0)
        .single()
        .filter(|_| info.timestamp > 0)
        .unwrap_or_else(Utc::now);
    Some(MediaRecord {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        msg_id: info.id.clone(),
        chat_jid: info.chat.clone(),
        sender_jid: info.sender.clone(),
        direction: Direction::from_me(info.from_me),
        media_type: kind.as_str().to_string(),
        mime_type: m
            .mimetype
            .clone()
            .unwrap_or_else(|| kind.default_mime().to_string()),
        file_size: i64::try_from(m.file_length).unwrap_or(i64::MAX),
        file_name: m.file_name.clone(),
        wa_direct_path: m.direct_path.clone(),
        wa_media_key: m.media_key.clone(),
        wa_file_sha256: m.file_sha256.clone(),
        wa_file_enc_sha256: m.file_enc_sha256.clone(),
        wa_media_key_timestamp: m.media_key_timestamp.unwrap_or_default(),
        width: m.width.map(i64::from),
        height: m.height.map(i64::from),
        storage_key: None,
        storage_url: None,
        stored_at: None,
        downloaded: false,
        download_error: None,
        download_attempts: 0,
        created_at,
    })
}

/// Message status a receipt moves a message to, if any.
pub fn receipt_status(receipt: &ReceiptType) -> Option<MessageStatus> {
    match receipt {
        ReceiptType::Delivery => Some(MessageStatus::Delivered),
        ReceiptType::Read | ReceiptType::ReadSelf => Some(MessageStatus::Read),
        ReceiptType::Played => Some(MessageStatus::Played),
        _ => None,
    }
}

/// Envelope `data` for an event.
///
/// Message events carry the normalized row; history sync is summarized;
/// everything else is the event's own fields. Session events also name the
/// session.
pub fn event_data(event: &RawEvent, kind: EventKind, session_id: &str, session_name: &str) -> Value {
    let mut data = match event {
        RawEvent::Message { info, payload } => message_data(session_id, info, payload),
        RawEvent::HistorySync {
            sync_type,
            progress,
            conversations,
        } => json!({
            "sync_type": sync_type,
            "progress": progress,
            "conversations": conversations.len(),
            "messages": conversations.iter().map(|c| c.messages.len()).sum::<usize>(),
        }),
        other => match serde_json::to_value(other) {
            Ok(Value::Object(mut map)) => {
                map.remove("type");
                Value::Object(map)
            }
            _ => Value::Object(Map::new()),
        },
    };
    if kind.as_str().starts_with("session.") {
        if let Value::Object(map) = &mut data {
            map.insert("session".into(), Value::String(session_name.to_string()));
        }
    }
    data
}

fn message_data(session_id: &str, info: &MessageInfo, payload: &MessagePayload) -> Value {
    match &payload.protocol {
        Some(ProtocolAction::Revoke { target_id }) => json!({
            "id": info.id,
            "chat": info.chat,
            "sender": info.sender,
            "from_me": info.from_me,
            "timestamp": info.timestamp,
            "target_id": target_id,
        }),
        Some(ProtocolAction::Edit { target_id, text }) => json!({
            "id": info.id,
            "chat": info.chat,
            "sender": info.sender,
            "from_me": info.from_me,
            "timestamp": info.timestamp,
            "target_id": target_id,
            "content": text,
        }),
        None => match message_record(session_id, info, payload, None) {
            Some(record) => {
                let mut value = serde_json::to_value(&record).unwrap_or_default();
                if let (Value::Object(map), Some(r)) = (&mut value, &payload.reaction) {
                    map.insert("target_id".into(), Value::String(r.target_id.clone()));
                }
                value
            }
            None => json!({
                "id": info.id,
                "chat": info.chat,
                "sender": info.sender,
                "from_me": info.from_me,
                "timestamp": info.timestamp,
                "type": "unknown",
            }),
        },
    }
}
