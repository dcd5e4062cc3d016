//! Persisted record types shared by the store, the dispatcher, and the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection status of a session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Qr,
    Connected,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Qr => "qr",
            Self::Connected => "connected",
        }
    }

    /// Unknown strings read back as `Disconnected`.
    pub fn parse(s: &str) -> Self {
        match s {
            "connecting" => Self::Connecting,
            "qr" => Self::Qr,
            "connected" => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted session row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    pub device_jid: Option<String>,
    pub phone: Option<String>,
    pub status: SessionStatus,
    pub push_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Normalized message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Contact,
    Reaction,
    Poll,
    PollUpdate,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Location => "location",
            Self::Contact => "contact",
            Self::Reaction => "reaction",
            Self::Poll => "poll",
            Self::PollUpdate => "poll_update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "text" => Self::Text,
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "document" => Self::Document,
            "sticker" => Self::Sticker,
            "location" => Self::Location,
            "contact" => Self::Contact,
            "reaction" => Self::Reaction,
            "poll" => Self::Poll,
            "poll_update" => Self::PollUpdate,
            _ => return None,
        })
    }

    /// Whether messages of this kind carry a downloadable blob.
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            Self::Image | Self::Video | Self::Audio | Self::Document | Self::Sticker
        )
    }
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Played,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Played => "played",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "delivered" => Self::Delivered,
            "read" => Self::Read,
            "played" => Self::Played,
            "failed" => Self::Failed,
            _ => Self::Sent,
        }
    }

    /// Position in the receipt order. Receipts only move a message upward.
    pub fn rank(&self) -> i64 {
        match self {
            Self::Failed => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Played => 4,
        }
    }
}

/// Persisted message row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub session_id: String,
    pub message_id: String,
    pub chat_jid: String,
    pub sender_jid: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub push_name: Option<String>,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub media_type: Option<String>,
    pub content: String,
    pub from_me: bool,
    pub is_group: bool,
    pub is_ephemeral: bool,
    pub is_view_once: bool,
    pub is_edit: bool,
    pub edit_target_id: Option<String>,
    pub quoted_id: Option<String>,
    pub quoted_sender: Option<String>,
    pub status: MessageStatus,
    /// Raw protocol event, JSON encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

/// Whether media was sent by this session or received from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Received => "received",
        }
    }

    pub fn from_me(from_me: bool) -> Self {
        if from_me {
            Self::Sent
        } else {
            Self::Received
        }
    }
}

/// Persisted media row. Download keys never leave the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: String,
    pub session_id: String,
    pub msg_id: String,
    pub chat_jid: String,
    pub sender_jid: String,
    pub direction: Direction,
    pub media_type: String,
    pub mime_type: String,
    pub file_size: i64,
    pub file_name: Option<String>,
    #[serde(skip)]
    pub wa_direct_path: String,
    #[serde(skip)]
    pub wa_media_key: Vec<u8>,
    #[serde(skip)]
    pub wa_file_sha256: Vec<u8>,
    #[serde(skip)]
    pub wa_file_enc_sha256: Vec<u8>,
    #[serde(skip)]
    pub wa_media_key_timestamp: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub storage_key: Option<String>,
    pub storage_url: Option<String>,
    pub stored_at: Option<DateTime<Utc>>,
    pub downloaded: bool,
    pub download_error: Option<String>,
    pub download_attempts: i64,
    pub created_at: DateTime<Utc>,
}

impl MediaRecord {
    /// The record carries enough protocol keys to fetch the blob.
    pub fn has_keys(&self) -> bool {
        !self.wa_direct_path.is_empty() && !self.wa_media_key.is_empty()
    }

    /// Eligible for the automatic download scan.
    pub fn needs_download(&self, max_attempts: i64) -> bool {
        !self.downloaded && self.has_keys() && self.download_attempts < max_attempts
    }
}

/// Persisted webhook configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRecord {
    pub id: String,
    pub session_id: String,
    pub url: String,
    pub events: Vec<String>,
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookRecord {
    pub fn has_secret(&self) -> bool {
        self.secret.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Per-chat metadata, seeded from history sync and kept current by chat-state events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub session_id: String,
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
    /// Unix seconds; 0 = not muted.
    pub muted_until: i64,
    /// Unix seconds of the last conversation activity.
    pub last_message_at: i64,
}
