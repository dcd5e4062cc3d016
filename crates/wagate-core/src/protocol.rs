//! Protocol-neutral event and payload types.
//!
//! The WhatsApp adapter translates its library events into [`RawEvent`];
//! everything downstream (dispatch, persistence, webhooks) only sees these.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Routing metadata for a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    pub chat: String,
    pub sender: String,
    pub from_me: bool,
    pub is_group: bool,
    /// Unix seconds.
    pub timestamp: i64,
    pub push_name: Option<String>,
    pub is_ephemeral: bool,
    pub is_view_once: bool,
    pub is_edit: bool,
}

/// Downloadable media referenced by a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub direct_path: String,
    #[serde(with = "b64")]
    pub media_key: Vec<u8>,
    #[serde(with = "b64")]
    pub file_sha256: Vec<u8>,
    #[serde(with = "b64")]
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
    pub mimetype: Option<String>,
    pub media_key_timestamp: Option<i64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_name: Option<String>,
    pub caption: Option<String>,
    pub seconds: Option<u32>,
    /// Voice note rather than a plain audio file.
    #[serde(default)]
    pub ptt: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactPayload {
    pub display_name: String,
    pub vcard: String,
}

/// A reaction to an earlier message. An empty `text` removes the reaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReactionPayload {
    pub target_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollPayload {
    pub name: String,
    pub options: Vec<String>,
    pub selectable_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollUpdatePayload {
    pub poll_id: String,
    /// Option hashes as reported by the protocol (hex).
    pub selected: Vec<String>,
}

/// Protocol-level edits carried inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProtocolAction {
    Revoke { target_id: String },
    Edit { target_id: String, text: String },
}

/// Reply context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotedRef {
    pub id: String,
    pub sender: String,
}

/// Normalized message body, already unwrapped from ephemeral/view-once/device-sent wrappers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub conversation: Option<String>,
    pub extended_text: Option<String>,
    pub image: Option<MediaAttachment>,
    pub video: Option<MediaAttachment>,
    pub audio: Option<MediaAttachment>,
    pub document: Option<MediaAttachment>,
    pub sticker: Option<MediaAttachment>,
    pub location: Option<LocationPayload>,
    pub contact: Option<ContactPayload>,
    pub reaction: Option<ReactionPayload>,
    pub poll: Option<PollPayload>,
    pub poll_update: Option<PollUpdatePayload>,
    pub protocol: Option<ProtocolAction>,
    pub quoted: Option<QuotedRef>,
}

impl MessagePayload {
    pub fn text(body: &str) -> Self {
        Self {
            conversation: Some(body.to_string()),
            ..Default::default()
        }
    }

    /// First media attachment together with its kind, if any.
    pub fn media(&self) -> Option<(MediaKind, &MediaAttachment)> {
        [
            (MediaKind::Image, &self.image),
            (MediaKind::Video, &self.video),
            (MediaKind::Audio, &self.audio),
            (MediaKind::Document, &self.document),
            (MediaKind::Sticker, &self.sticker),
        ]
        .into_iter()
        .find_map(|(kind, m)| m.as_ref().map(|m| (kind, m)))
    }
}

/// Kinds of media blobs the protocol can upload and download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "document" => Some(Self::Document),
            "sticker" => Some(Self::Sticker),
            _ => None,
        }
    }

    /// Content type used when the sender did not declare one.
    pub fn default_mime(&self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Video => "video/mp4",
            Self::Audio => "audio/ogg",
            Self::Document => "application/octet-stream",
            Self::Sticker => "image/webp",
        }
    }
}

/// Everything needed to fetch and decrypt a blob from the protocol CDN.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaKeys {
    pub kind: MediaKind,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
    pub mimetype: String,
}

/// Result of a protocol upload, referenced by the outgoing media message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadedMedia {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_length: u64,
}

/// Receipt kinds reported by the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptType {
    Delivery,
    Read,
    ReadSelf,
    Played,
    Sender,
    Retry,
    Other(String),
}

/// Outcome of a QR pairing attempt, delivered on the QR channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrEvent {
    Code(String),
    Success,
    Timeout,
    Error(String),
}

/// A conversation summary carried by history sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryConversation {
    pub jid: String,
    pub name: Option<String>,
    pub unread_count: i64,
    pub unread_mention_count: i64,
    pub ephemeral_expiration: i64,
    pub read_only: bool,
    pub locked: bool,
    pub suspended: bool,
    pub archived: bool,
    pub pinned: bool,
    pub muted_until: i64,
    pub last_message_at: i64,
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub info: MessageInfo,
    pub payload: MessagePayload,
}

/// Shared fields on every call signalling event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallMeta {
    pub call_id: String,
    pub from: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlocklistChange {
    pub jid: String,
    pub action: String,
}

/// Raw protocol event, one arm per upstream event family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    Connected,
    Disconnected,
    LoggedOut {
        reason: String,
        on_connect: bool,
    },
    ConnectFailure {
        reason: String,
        message: String,
    },
    StreamReplaced,
    StreamError {
        code: String,
    },
    TemporaryBan {
        code: i64,
        expire_secs: i64,
    },
    ClientOutdated,
    KeepAliveTimeout {
        error_count: i64,
    },
    KeepAliveRestored,
    PairSuccess {
        jid: String,
        business_name: Option<String>,
        platform: String,
    },
    PairError {
        jid: String,
        error: String,
    },

    Message {
        info: MessageInfo,
        payload: MessagePayload,
    },
    Receipt {
        chat: String,
        sender: String,
        receipt_type: ReceiptType,
        message_ids: Vec<String>,
        timestamp: i64,
    },
    UndecryptableMessage {
        info: MessageInfo,
        is_unavailable: bool,
    },
    MediaRetry {
        message_id: String,
        chat: String,
        result: String,
    },

    Presence {
        from: String,
        unavailable: bool,
        last_seen: Option<i64>,
    },
    ChatPresence {
        chat: String,
        sender: String,
        state: String,
        media: String,
    },

    HistorySync {
        sync_type: String,
        progress: Option<u32>,
        conversations: Vec<HistoryConversation>,
    },
    OfflineSyncPreview {
        total: i64,
        messages: i64,
        notifications: i64,
        receipts: i64,
    },
    OfflineSyncCompleted {
        count: i64,
    },
    AppState {
        name: String,
        index: Vec<String>,
    },
    AppStateSyncComplete {
        name: String,
    },

    PushName {
        jid: String,
        old: Option<String>,
        new: String,
    },
    Picture {
        jid: String,
        author: Option<String>,
        picture_id: Option<String>,
        remove: bool,
    },
    ContactUpdate {
        jid: String,
    },
    BusinessName {
        jid: String,
        old: Option<String>,
        new: String,
    },
    UserAbout {
        jid: String,
        status: String,
    },
    IdentityChange {
        jid: String,
        implicit: bool,
    },
    Blocklist {
        action: String,
        changes: Vec<BlocklistChange>,
    },
    PrivacySettings {
        settings: BTreeMap<String, String>,
    },

    CallOffer(CallMeta),
    CallOfferNotice {
        call: CallMeta,
        media: String,
        call_type: String,
    },
    CallAccept(CallMeta),
    CallPreAccept(CallMeta),
    CallReject(CallMeta),
    CallTerminate {
        call: CallMeta,
        reason: String,
    },
    CallTransport(CallMeta),
    CallRelayLatency {
        call: CallMeta,
        latency_ms: u32,
    },

    GroupInfo {
        jid: String,
        sender: Option<String>,
        name: Option<String>,
        topic: Option<String>,
        join: Vec<String>,
        leave: Vec<String>,
        promote: Vec<String>,
        demote: Vec<String>,
    },
    JoinedGroup {
        jid: String,
        name: String,
        reason: Option<String>,
    },

    NewsletterJoin {
        jid: String,
        name: String,
    },
    NewsletterLeave {
        jid: String,
        role: String,
    },
    NewsletterMuteChange {
        jid: String,
        muted: bool,
    },
    NewsletterLiveUpdate {
        jid: String,
        message_count: u32,
    },

    Archive {
        jid: String,
        archived: bool,
        timestamp: i64,
    },
    Pin {
        jid: String,
        pinned: bool,
        timestamp: i64,
    },
    Mute {
        jid: String,
        muted: bool,
        mute_end: i64,
        timestamp: i64,
    },
    Star {
        chat: String,
        message_id: String,
        starred: bool,
    },
    DeleteForMe {
        chat: String,
        message_id: String,
    },
    DeleteChat {
        jid: String,
    },
    ClearChat {
        jid: String,
    },
    MarkChatAsRead {
        jid: String,
        read: bool,
        timestamp: i64,
    },
    LabelEdit {
        label_id: String,
        name: String,
        deleted: bool,
    },
    LabelAssociationChat {
        jid: String,
        label_id: String,
        labeled: bool,
    },

    /// Upstream event with no mapping; dropped at debug level.
    Unknown {
        name: String,
    },
}

/// Outbound content accepted by [`crate::traits::ProtocolClient::send_message`].
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingContent {
    Text {
        body: String,
        quoted: Option<QuotedRef>,
    },
    Media {
        kind: MediaKind,
        upload: UploadedMedia,
        mimetype: String,
        caption: Option<String>,
        file_name: Option<String>,
        ptt: bool,
    },
    Location(LocationPayload),
    Contact(ContactPayload),
    Reaction {
        chat: String,
        target_id: String,
        target_from_me: bool,
        emoji: String,
    },
    Poll(PollPayload),
    PollVote {
        poll_id: String,
        options: Vec<String>,
    },
    Edit {
        target_id: String,
        text: String,
    },
    Revoke {
        target_id: String,
    },
}

/// Server acknowledgement of a sent message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub id: String,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Typing indicator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatPresenceState {
    Composing,
    Recording,
    Paused,
}

/// Group metadata returned by group operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub jid: String,
    pub name: String,
    pub topic: Option<String>,
    pub owner: Option<String>,
    pub participants: Vec<GroupParticipant>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupParticipant {
    pub jid: String,
    pub is_admin: bool,
    pub is_super_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_picks_first_attachment() {
        let payload = MessagePayload {
            video: Some(MediaAttachment::default()),
            document: Some(MediaAttachment::default()),
            ..Default::default()
        };
        assert_eq!(payload.media().map(|(k, _)| k), Some(MediaKind::Video));
        assert!(MessagePayload::text("hi").media().is_none());
    }

    #[test]
    fn test_raw_event_is_tagged() {
        let value = serde_json::to_value(RawEvent::Connected).unwrap();
        assert_eq!(value["type"], "connected");
        let value = serde_json::to_value(RawEvent::PushName {
            jid: "1@s.whatsapp.net".into(),
            old: None,
            new: "Ana".into(),
        })
        .unwrap();
        assert_eq!(value["type"], "push_name");
        assert_eq!(value["new"], "Ana");
    }

    #[test]
    fn test_media_keys_encode_as_base64() {
        let att = MediaAttachment {
            media_key: vec![0xff, 0x00],
            ..Default::default()
        };
        let value = serde_json::to_value(&att).unwrap();
        assert_eq!(value["media_key"], "/wA=");
        let back: MediaAttachment = serde_json::from_value(value).unwrap();
        assert_eq!(back.media_key, vec![0xff, 0x00]);
    }
}
