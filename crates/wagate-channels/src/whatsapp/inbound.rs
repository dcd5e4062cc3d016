//! Library events and messages into gateway [`RawEvent`]s.

use wacore::types::events::Event;
use wagate_core::protocol::{
    ContactPayload, LocationPayload, MediaAttachment, MessageInfo, MessagePayload, ProtocolAction,
    QuotedRef, RawEvent, ReactionPayload,
};
use waproto::whatsapp::Message;

/// `ProtocolMessage.Type` values the gateway acts on.
const PROTOCOL_REVOKE: i32 = 0;
const PROTOCOL_EDIT: i32 = 14;

macro_rules! attachment {
    ($m:expr) => {
        MediaAttachment {
            direct_path: $m.direct_path.clone().unwrap_or_default(),
            media_key: $m.media_key.clone().unwrap_or_default(),
            file_sha256: $m.file_sha256.clone().unwrap_or_default(),
            file_enc_sha256: $m.file_enc_sha256.clone().unwrap_or_default(),
            file_length: $m.file_length.unwrap_or_default(),
            mimetype: $m.mimetype.clone(),
            media_key_timestamp: $m.media_key_timestamp,
            ..Default::default()
        }
    };
}

/// Short event name for logging unmapped variants.
fn variant_name(event: &Event) -> String {
    let debug = format!("{event:?}");
    debug
        .split(['(', '{', ' '])
        .next()
        .unwrap_or("event")
        .to_string()
}

/// Translate the event families the gateway persists. Everything else is
/// surfaced as `Unknown` and dropped by the dispatcher.
pub(super) fn translate(event: &Event) -> Option<RawEvent> {
    Some(match event {
        // QR codes travel on the pairing channel, not the event stream.
        Event::PairingQrCode { .. } => return None,
        Event::Connected(_) => RawEvent::Connected,
        Event::Disconnected(_) => RawEvent::Disconnected,
        Event::LoggedOut(_) => RawEvent::LoggedOut {
            reason: "logged out".into(),
            on_connect: false,
        },
        Event::PairSuccess(pair) => RawEvent::PairSuccess {
            jid: pair.id.to_string(),
            business_name: Some(pair.business_name.clone()).filter(|s| !s.is_empty()),
            platform: pair.platform.clone(),
        },
        Event::Message(msg, info) => {
            let source = &info.source;
            RawEvent::Message {
                info: MessageInfo {
                    id: info.id.clone(),
                    chat: source.chat.to_string(),
                    sender: source.sender.to_string(),
                    from_me: source.is_from_me,
                    is_group: source.is_group,
                    timestamp: info.timestamp.timestamp(),
                    push_name: Some(info.push_name.clone()).filter(|s| !s.is_empty()),
                    is_ephemeral: msg.ephemeral_message.is_some(),
                    is_view_once: msg.view_once_message.is_some(),
                    is_edit: false,
                },
                payload: payload(msg),
            }
        }
        other => RawEvent::Unknown {
            name: variant_name(other),
        },
    })
}

/// Peel device-sent, ephemeral, and view-once wrappers.
fn unwrap(msg: &Message) -> &Message {
    msg.device_sent_message
        .as_ref()
        .and_then(|d| d.message.as_deref())
        .or_else(|| {
            msg.ephemeral_message
                .as_ref()
                .and_then(|e| e.message.as_deref())
        })
        .or_else(|| {
            msg.view_once_message
                .as_ref()
                .and_then(|v| v.message.as_deref())
        })
        .unwrap_or(msg)
}

pub(super) fn payload(raw: &Message) -> MessagePayload {
    let msg = unwrap(raw);
    let mut out = MessagePayload {
        conversation: msg.conversation.clone(),
        ..Default::default()
    };

    if let Some(ext) = msg.extended_text_message.as_ref() {
        out.extended_text = ext.text.clone();
        out.quoted = ext.context_info.as_ref().and_then(|ctx| {
            ctx.stanza_id.as_ref().map(|id| QuotedRef {
                id: id.clone(),
                sender: ctx.participant.clone().unwrap_or_default(),
            })
        });
    }
    if let Some(m) = msg.image_message.as_ref() {
        out.image = Some(MediaAttachment {
            caption: m.caption.clone(),
            width: m.width,
            height: m.height,
            ..attachment!(m)
        });
    }
    if let Some(m) = msg.video_message.as_ref() {
        out.video = Some(MediaAttachment {
            caption: m.caption.clone(),
            width: m.width,
            height: m.height,
            seconds: m.seconds,
            ..attachment!(m)
        });
    }
    if let Some(m) = msg.audio_message.as_ref() {
        out.audio = Some(MediaAttachment {
            seconds: m.seconds,
            ptt: m.ptt.unwrap_or(false),
            ..attachment!(m)
        });
    }
    if let Some(m) = msg.document_message.as_ref() {
        out.document = Some(MediaAttachment {
            caption: m.caption.clone(),
            file_name: m.file_name.clone(),
            ..attachment!(m)
        });
    }
    if let Some(m) = msg.sticker_message.as_ref() {
        out.sticker = Some(MediaAttachment {
            width: m.width,
            height: m.height,
            ..attachment!(m)
        });
    }
    if let Some(m) = msg.location_message.as_ref() {
        out.location = Some(LocationPayload {
            latitude: m.degrees_latitude.unwrap_or_default(),
            longitude: m.degrees_longitude.unwrap_or_default(),
            name: m.name.clone(),
            address: m.address.clone(),
        });
    }
    if let Some(m) = msg.contact_message.as_ref() {
        out.contact = Some(ContactPayload {
            display_name: m.display_name.clone().unwrap_or_default(),
            vcard: m.vcard.clone().unwrap_or_default(),
        });
    }
    if let Some(m) = msg.reaction_message.as_ref() {
        out.reaction = Some(ReactionPayload {
            target_id: m
                .key
                .as_ref()
                .and_then(|k| k.id.clone())
                .unwrap_or_default(),
            text: m.text.clone().unwrap_or_default(),
        });
    }
    if let Some(p) = msg.protocol_message.as_ref() {
        let target_id = p
            .key
            .as_ref()
            .and_then(|k| k.id.clone())
            .unwrap_or_default();
        out.protocol = match p.r#type {
            Some(PROTOCOL_REVOKE) => Some(ProtocolAction::Revoke { target_id }),
            Some(PROTOCOL_EDIT) => {
                let text = p
                    .edited_message
                    .as_deref()
                    .map(|edited| {
                        let edited = unwrap(edited);
                        edited
                            .conversation
                            .clone()
                            .or_else(|| {
                                edited
                                    .extended_text_message
                                    .as_ref()
                                    .and_then(|e| e.text.clone())
                            })
                            .unwrap_or_default()
                    })
                    .unwrap_or_default();
                Some(ProtocolAction::Edit { target_id, text })
            }
            _ => None,
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use waproto::whatsapp::message::{ExtendedTextMessage, ImageMessage};

    #[test]
    fn test_plain_conversation() {
        let msg = Message {
            conversation: Some("hola".into()),
            ..Default::default()
        };
        let p = payload(&msg);
        assert_eq!(p.conversation.as_deref(), Some("hola"));
        assert!(p.media().is_none());
    }

    #[test]
    fn test_image_keys_carried() {
        let msg = Message {
            image_message: Some(
                ImageMessage {
                    direct_path: Some("/v/t62/x".into()),
                    media_key: Some(vec![9; 32]),
                    mimetype: Some("image/jpeg".into()),
                    caption: Some("cap".into()),
                    file_length: Some(10),
                    ..Default::default()
                }
                .into(),
            ),
            ..Default::default()
        };
        let p = payload(&msg);
        let (kind, media) = p.media().unwrap();
        assert_eq!(kind.as_str(), "image");
        assert_eq!(media.direct_path, "/v/t62/x");
        assert_eq!(media.media_key.len(), 32);
        assert_eq!(media.caption.as_deref(), Some("cap"));
    }

    #[test]
    fn test_extended_text() {
        let msg = Message {
            extended_text_message: Some(
                ExtendedTextMessage {
                    text: Some("see https://example.com".into()),
                    ..Default::default()
                }
                .into(),
            ),
            ..Default::default()
        };
        assert_eq!(
            payload(&msg).extended_text.as_deref(),
            Some("see https://example.com")
        );
    }
}
