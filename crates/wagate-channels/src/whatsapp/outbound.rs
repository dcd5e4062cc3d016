//! Gateway content into library protocol messages.

use wagate_core::{
    error::GatewayError,
    protocol::{MediaKeys, MediaKind, OutgoingContent},
};
use waproto::whatsapp::message::peer_data_operation_request_message::PlaceholderMessageResendRequest;
use waproto::whatsapp::message::{
    AudioMessage, ContactMessage, DocumentMessage, ExtendedTextMessage, ImageMessage,
    LocationMessage, PeerDataOperationRequestMessage, ProtocolMessage, ReactionMessage,
    StickerMessage, VideoMessage,
};
use waproto::whatsapp::{ContextInfo, Message, MessageKey};
use whatsapp_rust::download::MediaType;

const PROTOCOL_REVOKE: i32 = 0;
const PROTOCOL_EDIT: i32 = 14;
const PROTOCOL_PEER_DATA_REQUEST: i32 = 16;
const PEER_DATA_PLACEHOLDER_RESEND: i32 = 4;

pub(super) fn media_type(kind: MediaKind) -> MediaType {
    match kind {
        MediaKind::Image | MediaKind::Sticker => MediaType::Image,
        MediaKind::Video => MediaType::Video,
        MediaKind::Audio => MediaType::Audio,
        MediaKind::Document => MediaType::Document,
    }
}

fn own_key(chat: &str, id: &str) -> MessageKey {
    MessageKey {
        remote_jid: Some(chat.to_string()),
        from_me: Some(true),
        id: Some(id.to_string()),
        ..Default::default()
    }
}

/// Build the protocol message for `content` addressed to `chat`.
pub(super) fn build(chat: &str, content: OutgoingContent) -> Result<Message, GatewayError> {
    let msg = match content {
        OutgoingContent::Text { body, quoted: None } => Message {
            conversation: Some(body),
            ..Default::default()
        },
        OutgoingContent::Text {
            body,
            quoted: Some(quoted),
        } => Message {
            extended_text_message: Some(
                ExtendedTextMessage {
                    text: Some(body),
                    context_info: Some(
                        ContextInfo {
                            stanza_id: Some(quoted.id),
                            participant: Some(quoted.sender).filter(|s| !s.is_empty()),
                            ..Default::default()
                        }
                        .into(),
                    ),
                    ..Default::default()
                }
                .into(),
            ),
            ..Default::default()
        },
        OutgoingContent::Media {
            kind,
            upload,
            mimetype,
            caption,
            file_name,
            ptt,
        } => {
            macro_rules! media {
                ($ty:ident { $($extra:tt)* }) => {
                    $ty {
                        url: Some(upload.url),
                        direct_path: Some(upload.direct_path),
                        media_key: Some(upload.media_key),
                        file_enc_sha256: Some(upload.file_enc_sha256),
                        file_sha256: Some(upload.file_sha256),
                        file_length: Some(upload.file_length),
                        mimetype: Some(mimetype),
                        $($extra)*
                        ..Default::default()
                    }
                    .into()
                };
            }
            match kind {
                MediaKind::Image => Message {
                    image_message: Some(media!(ImageMessage { caption: caption, })),
                    ..Default::default()
                },
                MediaKind::Video => Message {
                    video_message: Some(media!(VideoMessage { caption: caption, })),
                    ..Default::default()
                },
                MediaKind::Audio => Message {
                    audio_message: Some(media!(AudioMessage { ptt: Some(ptt), })),
                    ..Default::default()
                },
                MediaKind::Document => Message {
                    document_message: Some(media!(DocumentMessage {
                        caption: caption,
                        title: file_name.clone(),
                        file_name: file_name,
                    })),
                    ..Default::default()
                },
                MediaKind::Sticker => Message {
                    sticker_message: Some(media!(StickerMessage {})),
                    ..Default::default()
                },
            }
        }
        OutgoingContent::Location(loc) => Message {
            location_message: Some(
                LocationMessage {
                    degrees_latitude: Some(loc.latitude),
                    degrees_longitude: Some(loc.longitude),
                    name: loc.name,
                    address: loc.address,
                    ..Default::default()
                }
                .into(),
            ),
            ..Default::default()
        },
        OutgoingContent::Contact(contact) => Message {
            contact_message: Some(
                ContactMessage {
                    display_name: Some(contact.display_name),
                    vcard: Some(contact.vcard),
                    ..Default::default()
                }
                .into(),
            ),
            ..Default::default()
        },
        OutgoingContent::Reaction {
            chat: target_chat,
            target_id,
            target_from_me,
            emoji,
        } => Message {
            reaction_message: Some(
                ReactionMessage {
                    key: Some(MessageKey {
                        remote_jid: Some(target_chat),
                        from_me: Some(target_from_me),
                        id: Some(target_id),
                        ..Default::default()
                    }),
                    text: Some(emoji),
                    sender_timestamp_ms: Some(chrono::Utc::now().timestamp_millis()),
                    ..Default::default()
                }
                .into(),
            ),
            ..Default::default()
        },
        OutgoingContent::Edit { target_id, text } => Message {
            protocol_message: Some(
                ProtocolMessage {
                    key: Some(own_key(chat, &target_id)),
                    r#type: Some(PROTOCOL_EDIT),
                    edited_message: Some(
                        Message {
                            conversation: Some(text),
                            ..Default::default()
                        }
                        .into(),
                    ),
                    ..Default::default()
                }
                .into(),
            ),
            ..Default::default()
        },
        OutgoingContent::Revoke { target_id } => Message {
            protocol_message: Some(
                ProtocolMessage {
                    key: Some(own_key(chat, &target_id)),
                    r#type: Some(PROTOCOL_REVOKE),
                    ..Default::default()
                }
                .into(),
            ),
            ..Default::default()
        },
        OutgoingContent::Poll(_) | OutgoingContent::PollVote { .. } => {
            return Err(GatewayError::Unsupported(
                "polls are not supported by the whatsapp-web backend".into(),
            ))
        }
    };
    Ok(msg)
}

/// Ask our own phone to resend a message this device could not decrypt.
/// The request travels as a peer message to the account's own jid.
pub(super) fn unavailable_request(chat: &str, sender: &str, id: &str) -> Message {
    let key = MessageKey {
        remote_jid: Some(chat.to_string()),
        from_me: Some(false),
        id: Some(id.to_string()),
        participant: Some(sender.to_string())
            .filter(|s| !s.is_empty() && wagate_core::jid::is_group(chat)),
        ..Default::default()
    };
    Message {
        protocol_message: Some(
            ProtocolMessage {
                r#type: Some(PROTOCOL_PEER_DATA_REQUEST),
                peer_data_operation_request_message: Some(
                    PeerDataOperationRequestMessage {
                        peer_data_operation_request_type: Some(PEER_DATA_PLACEHOLDER_RESEND),
                        placeholder_message_resend_request: vec![
                            PlaceholderMessageResendRequest {
                                message_key: Some(key),
                            },
                        ],
                        ..Default::default()
                    }
                    .into(),
                ),
                ..Default::default()
            }
            .into(),
        ),
        ..Default::default()
    }
}

macro_rules! downloadable {
    ($ty:ident, $keys:expr) => {
        $ty {
            direct_path: Some($keys.direct_path.clone()),
            media_key: Some($keys.media_key.clone()),
            file_sha256: Some($keys.file_sha256.clone()),
            file_enc_sha256: Some($keys.file_enc_sha256.clone()),
            file_length: Some($keys.file_length),
            mimetype: Some($keys.mimetype.clone()),
            ..Default::default()
        }
    };
}

/// A media message carrying only what the library needs to fetch the blob.
pub(super) enum Downloadable {
    Image(ImageMessage),
    Video(VideoMessage),
    Audio(AudioMessage),
    Document(DocumentMessage),
    Sticker(StickerMessage),
}

impl Downloadable {
    pub(super) fn from_keys(keys: &MediaKeys) -> Self {
        match keys.kind {
            MediaKind::Image => Self::Image(downloadable!(ImageMessage, keys)),
            MediaKind::Video => Self::Video(downloadable!(VideoMessage, keys)),
            MediaKind::Audio => Self::Audio(downloadable!(AudioMessage, keys)),
            MediaKind::Document => Self::Document(downloadable!(DocumentMessage, keys)),
            MediaKind::Sticker => Self::Sticker(downloadable!(StickerMessage, keys)),
        }
    }
}
