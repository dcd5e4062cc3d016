use crate::{
    error::GatewayError,
    protocol::{
        ChatPresenceState, GroupInfo, MediaKeys, MediaKind, OutgoingContent, ParticipantAction,
        QrEvent, RawEvent, SendReceipt, UploadedMedia,
    },
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Callback the protocol client invokes for every upstream event.
pub type EventHandler = Arc<dyn Fn(RawEvent) -> BoxFuture<'static, ()> + Send + Sync>;

fn unsupported(op: &str) -> GatewayError {
    GatewayError::Unsupported(format!("{op} is not supported by this protocol client"))
}

/// One authenticated (or authenticating) WhatsApp device.
///
/// Instances are built per session by a [`ProtocolFactory`] and owned by the
/// session registry. Optional operations default to an `Unsupported` error.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// JID of the paired device, once authenticated.
    fn device_jid(&self) -> Option<String>;

    /// Whether the transport is currently up.
    fn is_connected(&self) -> bool;

    /// Register the single event sink. Must be called before `connect`.
    fn add_event_handler(&self, handler: EventHandler);

    /// Channel of QR pairing events. Must be obtained before `connect`.
    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>, GatewayError>;

    async fn connect(&self) -> Result<(), GatewayError>;

    async fn disconnect(&self);

    /// Invalidate the credentials on the server.
    async fn logout(&self) -> Result<(), GatewayError>;

    /// Remove the local device record and its keys.
    async fn delete_device(&self) -> Result<(), GatewayError>;

    /// Start phone-number pairing; returns the raw code shown to the user.
    async fn pair_phone(&self, phone: &str) -> Result<String, GatewayError>;

    async fn send_message(
        &self,
        to: &str,
        content: OutgoingContent,
    ) -> Result<SendReceipt, GatewayError>;

    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> Result<UploadedMedia, GatewayError>;

    /// Fetch and decrypt a blob by its stored keys.
    async fn download_media(&self, keys: &MediaKeys) -> Result<Vec<u8>, GatewayError>;

    /// Ask the sender's phone to re-upload a message whose media expired.
    async fn request_unavailable_message(
        &self,
        _chat: &str,
        _sender: &str,
        _message_id: &str,
    ) -> Result<(), GatewayError> {
        Err(unsupported("request_unavailable_message"))
    }

    async fn send_presence(&self, _available: bool) -> Result<(), GatewayError> {
        Err(unsupported("send_presence"))
    }

    async fn send_chat_presence(
        &self,
        _chat: &str,
        _state: ChatPresenceState,
    ) -> Result<(), GatewayError> {
        Err(unsupported("send_chat_presence"))
    }

    async fn mark_read(
        &self,
        _chat: &str,
        _sender: &str,
        _message_ids: &[String],
    ) -> Result<(), GatewayError> {
        Err(unsupported("mark_read"))
    }

    async fn archive_chat(&self, _chat: &str, _archive: bool) -> Result<(), GatewayError> {
        Err(unsupported("archive_chat"))
    }

    async fn delete_chat(&self, _chat: &str) -> Result<(), GatewayError> {
        Err(unsupported("delete_chat"))
    }

    async fn group_create(
        &self,
        _name: &str,
        _participants: &[String],
    ) -> Result<GroupInfo, GatewayError> {
        Err(unsupported("group_create"))
    }

    async fn group_info(&self, _jid: &str) -> Result<GroupInfo, GatewayError> {
        Err(unsupported("group_info"))
    }

    async fn group_list(&self) -> Result<Vec<GroupInfo>, GatewayError> {
        Err(unsupported("group_list"))
    }

    async fn group_leave(&self, _jid: &str) -> Result<(), GatewayError> {
        Err(unsupported("group_leave"))
    }

    async fn group_set_name(&self, _jid: &str, _name: &str) -> Result<(), GatewayError> {
        Err(unsupported("group_set_name"))
    }

    async fn group_set_topic(&self, _jid: &str, _topic: &str) -> Result<(), GatewayError> {
        Err(unsupported("group_set_topic"))
    }

    async fn group_participants(
        &self,
        _jid: &str,
        _action: ParticipantAction,
        _participants: &[String],
    ) -> Result<(), GatewayError> {
        Err(unsupported("group_participants"))
    }

    async fn group_invite_link(&self, _jid: &str, _reset: bool) -> Result<String, GatewayError> {
        Err(unsupported("group_invite_link"))
    }

    /// Join via invite code; returns the group JID.
    async fn group_join(&self, _code: &str) -> Result<String, GatewayError> {
        Err(unsupported("group_join"))
    }
}

/// Builds protocol clients bound to a session's device record.
#[async_trait]
pub trait ProtocolFactory: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Create an empty device record for a new session.
    async fn provision(&self, session_id: &str) -> Result<(), GatewayError>;

    /// Build a client over the session's device record.
    async fn build(&self, session_id: &str) -> Result<Arc<dyn ProtocolClient>, GatewayError>;
}

/// Location of an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub size: u64,
}

/// S3-compatible object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &str;

    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self) -> Result<(), GatewayError>;

    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, GatewayError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, GatewayError>;

    async fn delete(&self, key: &str) -> Result<(), GatewayError>;

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, GatewayError>;

    /// Stable public URL for a key.
    fn public_url(&self, key: &str) -> String;
}
