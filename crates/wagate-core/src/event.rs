//! Domain event taxonomy and the envelope shared by webhooks and SSE.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical domain event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionConnected,
    SessionDisconnected,
    SessionLoggedOut,
    SessionQr,
    SessionConnectFailure,
    SessionStreamReplaced,
    SessionStreamError,
    SessionTemporaryBan,
    SessionClientOutdated,
    SessionKeepaliveTimeout,
    SessionKeepaliveRestored,
    SessionPairSuccess,
    SessionPairError,

    MessageReceived,
    MessageSent,
    MessageReceipt,
    MessageReaction,
    MessageDeleted,
    MessageEdited,
    MessageUndecryptable,
    MessageMediaRetry,

    PresenceUpdate,
    ChatPresence,

    SyncOfflinePreview,
    SyncOfflineCompleted,
    SyncAppState,
    SyncAppStateComplete,
    HistorySync,

    ContactPushName,
    ContactPicture,
    ContactUpdate,
    ContactBusinessName,
    ContactAbout,

    CallOffer,
    CallOfferNotice,
    CallAccept,
    CallPreAccept,
    CallReject,
    CallTerminate,
    CallTransport,
    CallRelayLatency,

    GroupUpdate,
    GroupJoined,
    GroupParticipants,

    PrivacySettings,
    PrivacyIdentityChange,
    PrivacyBlocklist,

    NewsletterJoin,
    NewsletterLeave,
    NewsletterMuteChange,
    NewsletterLiveUpdate,

    ChatArchive,
    ChatPin,
    ChatMute,
    ChatStar,
    ChatDeleteForMe,
    ChatDelete,
    ChatClear,
    ChatMarkAsRead,
    ChatLabelEdit,
    ChatLabelAssociation,

    /// Synthetic event used by the webhook test endpoint.
    WebhookTest,
}

impl EventKind {
    /// Every subscribable event, in taxonomy order.
    pub const ALL: &'static [EventKind] = &[
        Self::SessionConnected,
        Self::SessionDisconnected,
        Self::SessionLoggedOut,
        Self::SessionQr,
        Self::SessionConnectFailure,
        Self::SessionStreamReplaced,
        Self::SessionStreamError,
        Self::SessionTemporaryBan,
        Self::SessionClientOutdated,
        Self::SessionKeepaliveTimeout,
        Self::SessionKeepaliveRestored,
        Self::SessionPairSuccess,
        Self::SessionPairError,
        Self::MessageReceived,
        Self::MessageSent,
        Self::MessageReceipt,
        Self::MessageReaction,
        Self::MessageDeleted,
        Self::MessageEdited,
        Self::MessageUndecryptable,
        Self::MessageMediaRetry,
        Self::PresenceUpdate,
        Self::ChatPresence,
        Self::SyncOfflinePreview,
        Self::SyncOfflineCompleted,
        Self::SyncAppState,
        Self::SyncAppStateComplete,
        Self::HistorySync,
        Self::ContactPushName,
        Self::ContactPicture,
        Self::ContactUpdate,
        Self::ContactBusinessName,
        Self::ContactAbout,
        Self::CallOffer,
        Self::CallOfferNotice,
        Self::CallAccept,
        Self::CallPreAccept,
        Self::CallReject,
        Self::CallTerminate,
        Self::CallTransport,
        Self::CallRelayLatency,
        Self::GroupUpdate,
        Self::GroupJoined,
        Self::GroupParticipants,
        Self::PrivacySettings,
        Self::PrivacyIdentityChange,
        Self::PrivacyBlocklist,
        Self::NewsletterJoin,
        Self::NewsletterLeave,
        Self::NewsletterMuteChange,
        Self::NewsletterLiveUpdate,
        Self::ChatArchive,
        Self::ChatPin,
        Self::ChatMute,
        Self::ChatStar,
        Self::ChatDeleteForMe,
        Self::ChatDelete,
        Self::ChatClear,
        Self::ChatMarkAsRead,
        Self::ChatLabelEdit,
        Self::ChatLabelAssociation,
    ];

    /// Dotted wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionConnected => "session.connected",
            Self::SessionDisconnected => "session.disconnected",
            Self::SessionLoggedOut => "session.logged_out",
            Self::SessionQr => "session.qr",
            Self::SessionConnectFailure => "session.connect_failure",
            Self::SessionStreamReplaced => "session.stream_replaced",
            Self::SessionStreamError => "session.stream_error",
            Self::SessionTemporaryBan => "session.temporary_ban",
            Self::SessionClientOutdated => "session.client_outdated",
            Self::SessionKeepaliveTimeout => "session.keepalive_timeout",
            Self::SessionKeepaliveRestored => "session.keepalive_restored",
            Self::SessionPairSuccess => "session.pair_success",
            Self::SessionPairError => "session.pair_error",
            Self::MessageReceived => "message.received",
            Self::MessageSent => "message.sent",
            Self::MessageReceipt => "message.receipt",
            Self::MessageReaction => "message.reaction",
            Self::MessageDeleted => "message.deleted",
            Self::MessageEdited => "message.edited",
            Self::MessageUndecryptable => "message.undecryptable",
            Self::MessageMediaRetry => "message.media_retry",
            Self::PresenceUpdate => "presence.update",
            Self::ChatPresence => "chat.presence",
            Self::SyncOfflinePreview => "sync.offline_preview",
            Self::SyncOfflineCompleted => "sync.offline_completed",
            Self::SyncAppState => "sync.app_state",
            Self::SyncAppStateComplete => "sync.app_state_complete",
            Self::HistorySync => "history.sync",
            Self::ContactPushName => "contact.push_name",
            Self::ContactPicture => "contact.picture",
            Self::ContactUpdate => "contact.update",
            Self::ContactBusinessName => "contact.business_name",
            Self::ContactAbout => "contact.about",
            Self::CallOffer => "call.offer",
            Self::CallOfferNotice => "call.offer_notice",
            Self::CallAccept => "call.accept",
            Self::CallPreAccept => "call.pre_accept",
            Self::CallReject => "call.reject",
            Self::CallTerminate => "call.terminate",
            Self::CallTransport => "call.transport",
            Self::CallRelayLatency => "call.relay_latency",
            Self::GroupUpdate => "group.update",
            Self::GroupJoined => "group.joined",
            Self::GroupParticipants => "group.participants",
            Self::PrivacySettings => "privacy.settings",
            Self::PrivacyIdentityChange => "privacy.identity_change",
            Self::PrivacyBlocklist => "privacy.blocklist",
            Self::NewsletterJoin => "newsletter.join",
            Self::NewsletterLeave => "newsletter.leave",
            Self::NewsletterMuteChange => "newsletter.mute_change",
            Self::NewsletterLiveUpdate => "newsletter.live_update",
            Self::ChatArchive => "chat.archive",
            Self::ChatPin => "chat.pin",
            Self::ChatMute => "chat.mute",
            Self::ChatStar => "chat.star",
            Self::ChatDeleteForMe => "chat.delete_for_me",
            Self::ChatDelete => "chat.delete",
            Self::ChatClear => "chat.clear",
            Self::ChatMarkAsRead => "chat.mark_as_read",
            Self::ChatLabelEdit => "chat.label_edit",
            Self::ChatLabelAssociation => "chat.label_association",
            Self::WebhookTest => "webhook.test",
        }
    }

    /// Look up an event by its dotted name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an event filter entry means "everything".
pub fn is_wildcard(name: &str) -> bool {
    name == "*" || name.eq_ignore_ascii_case("all")
}

/// Match an event against a webhook subscription list.
///
/// Empty lists and lists containing `*` or `all` match every event;
/// otherwise only explicit members match.
pub fn filter_matches(filter: &[String], event: &str) -> bool {
    filter.is_empty() || filter.iter().any(|f| is_wildcard(f) || f == event)
}

/// Check that every entry in a subscription list is a known event or a wildcard.
pub fn validate_filter(filter: &[String]) -> Result<(), String> {
    for name in filter {
        if !is_wildcard(name) && EventKind::parse(name).is_none() {
            return Err(format!("unknown event '{name}'"));
        }
    }
    Ok(())
}

/// The JSON document delivered to webhooks and SSE subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub data: Value,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(kind: EventKind, session_id: &str, data: Value) -> Self {
        Self {
            event: kind.as_str().to_string(),
            session_id: session_id.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            data,
        }
    }
}
