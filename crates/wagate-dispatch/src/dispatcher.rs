//! Per-session event processing: classify, persist, broadcast.
//!
//! The protocol client pushes raw events into a bounded [`Mailbox`]; one
//! worker per session drains it so events are persisted and broadcast in
//! delivery order. Persistence failures are logged and the event is still
//! broadcast.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use wagate_core::{
    error::GatewayError,
    event::{Envelope, EventKind},
    protocol::{HistoryConversation, MessageInfo, MessagePayload, ProtocolAction, RawEvent},
    records::{ChatRecord, SessionStatus},
    traits::EventHandler,
};
use wagate_store::{ChatFlag, Store};

use crate::classify::{event_data, event_kind, media_record, message_record, receipt_status};
use crate::sse::SseHub;
use crate::webhook::WebhookSender;

/// Identity of the session an event belongs to.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: String,
    pub name: String,
    /// Cancelled when the session is deleted.
    pub cancel: CancellationToken,
}

/// Lifecycle facts the registry needs to mirror in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    Connected,
    Disconnected,
    LoggedOut { reason: String },
    Paired { jid: String },
}

pub type SignalHandler = Arc<dyn Fn(SessionSignal) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct Dispatcher {
    store: Store,
    webhooks: WebhookSender,
    hub: Arc<SseHub>,
    media_ready: Arc<Notify>,
}

impl Dispatcher {
    pub fn new(
        store: Store,
        webhooks: WebhookSender,
        hub: Arc<SseHub>,
        media_ready: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            webhooks,
            hub,
            media_ready,
        }
    }

    pub fn hub(&self) -> &Arc<SseHub> {
        &self.hub
    }

    pub fn webhooks(&self) -> &WebhookSender {
        &self.webhooks
    }

    /// Process one raw event end to end.
    pub async fn handle(&self, ctx: &SessionContext, event: RawEvent) -> Option<SessionSignal> {
        let Some(kind) = event_kind(&event) else {
            if let RawEvent::Unknown { name } = &event {
                debug!(session = %ctx.name, event = %name, "unhandled protocol event");
            }
            return None;
        };

        let signal = self.persist(ctx, &event).await;
        let data = event_data(&event, kind, &ctx.id, &ctx.name);
        self.broadcast(ctx, Envelope::new(kind, &ctx.id, data)).await;
        signal
    }

    /// Publish an envelope to SSE subscribers and matching webhooks.
    pub async fn broadcast(&self, ctx: &SessionContext, envelope: Envelope) {
        self.hub.publish(&envelope);
        if let Err(e) = self.webhooks.send(&envelope, &ctx.cancel).await {
            error!(session = %ctx.name, event = %envelope.event, "webhook lookup failed: {e}");
        }
    }

    /// Broadcast a synthetic session event (QR codes, connect failures).
    pub async fn emit(&self, ctx: &SessionContext, kind: EventKind, mut data: serde_json::Value) {
        if let serde_json::Value::Object(map) = &mut data {
            map.insert("session".into(), ctx.name.clone().into());
        }
        self.broadcast(ctx, Envelope::new(kind, &ctx.id, data)).await;
    }

    async fn persist(&self, ctx: &SessionContext, event: &RawEvent) -> Option<SessionSignal> {
        let sid = ctx.id.as_str();
        match event {
            RawEvent::Connected => {
                let result = self.store.update_session_status(sid, SessionStatus::Connected).await;
                self.log_err(ctx, "status", result);
                Some(SessionSignal::Connected)
            }
            RawEvent::Disconnected
            | RawEvent::StreamReplaced
            | RawEvent::ClientOutdated
            | RawEvent::TemporaryBan { .. }
            | RawEvent::ConnectFailure { .. } => {
                let result = self.store.update_session_status(sid, SessionStatus::Disconnected).await;
                self.log_err(ctx, "status", result);
                Some(SessionSignal::Disconnected)
            }
            RawEvent::LoggedOut { reason, .. } => {
                let result = self.store.update_session_status(sid, SessionStatus::Disconnected).await;
                self.log_err(ctx, "status", result);
                self.log_err(ctx, "device", self.store.set_session_device(sid, None).await);
                Some(SessionSignal::LoggedOut {
                    reason: reason.clone(),
                })
            }
            RawEvent::PairSuccess { jid, .. } => {
                self.log_err(ctx, "device", self.store.set_session_device(sid, Some(jid)).await);
                Some(SessionSignal::Paired { jid: jid.clone() })
            }
            RawEvent::Message { info, payload } => {
                let raw = serde_json::to_string(event).ok();
                self.persist_message(ctx, info, payload, raw).await;
                None
            }
            RawEvent::Receipt {
                receipt_type,
                message_ids,
                ..
            } => {
                if let Some(status) = receipt_status(receipt_type) {
                    match self.store.apply_receipt(sid, message_ids, status).await {
                        Ok(n) => debug!(
                            session = %ctx.name,
                            advanced = n,
                            status = status.as_str(),
                            "receipt applied"
                        ),
                        Err(e) => error!(session = %ctx.name, "receipt update failed: {e}"),
                    }
                }
                None
            }
            RawEvent::HistorySync { conversations, .. } => {
                self.persist_history(ctx, conversations).await;
                None
            }
            RawEvent::Archive { jid, archived, .. } => {
                let result = self.store.set_chat_flag(sid, jid, ChatFlag::Archived, *archived).await;
                self.log_err(ctx, "chat", result);
                None
            }
            RawEvent::Pin { jid, pinned, .. } => {
                let result = self.store.set_chat_flag(sid, jid, ChatFlag::Pinned, *pinned).await;
                self.log_err(ctx, "chat", result);
                None
            }
            RawEvent::Mute {
                jid,
                muted,
                mute_end,
                ..
            } => {
                // -1 = muted with no end.
                let until = match (*muted, *mute_end) {
                    (false, _) => 0,
                    (true, end) if end > 0 => end,
                    (true, _) => -1,
                };
                self.log_err(ctx, "chat", self.store.set_chat_muted(sid, jid, until).await);
                None
            }
            RawEvent::MarkChatAsRead { jid, read, .. } => {
                self.log_err(ctx, "chat", self.store.set_chat_read(sid, jid, *read).await);
                None
            }
            RawEvent::DeleteChat { jid } => {
                self.log_err(ctx, "chat", self.store.delete_chat(sid, jid).await);
                None
            }
            _ => None,
        }
    }

    async fn persist_message(
        &self,
        ctx: &SessionContext,
        info: &MessageInfo,
        payload: &MessagePayload,
        raw: Option<String>,
    ) {
        let sid = ctx.id.as_str();
        match &payload.protocol {
            // The edit row is kept either way; an unknown target picks it up on arrival.
            Some(ProtocolAction::Edit { target_id, text }) => {
                if let Some(record) = message_record(sid, info, payload, raw) {
                    if let Err(e) = self.store.upsert_message(&record).await {
                        error!(session = %ctx.name, msg_id = %info.id, "edit insert failed: {e}");
                        return;
                    }
                }
                match self.store.apply_edit(sid, target_id, text).await {
                    Ok(false) => debug!(session = %ctx.name, msg_id = %target_id, "edit held for unknown message"),
                    Ok(true) => {}
                    Err(e) => error!(session = %ctx.name, msg_id = %target_id, "edit failed: {e}"),
                }
                return;
            }
            // History is kept; the revoke is only broadcast.
            Some(ProtocolAction::Revoke { .. }) => return,
            None => {}
        }

        let Some(record) = message_record(sid, info, payload, raw) else {
            debug!(session = %ctx.name, msg_id = %info.id, "message without storable content");
            return;
        };
        if let Err(e) = self.store.upsert_message(&record).await {
            error!(session = %ctx.name, msg_id = %info.id, "message insert failed: {e}");
            return;
        }
        self.log_err(ctx, "chat", self.store.touch_chat(sid, &info.chat, info.timestamp).await);

        if let Some(media) = media_record(sid, info, payload) {
            if !media.has_keys() {
                warn!(session = %ctx.name, msg_id = %info.id, "media message without download keys");
            }
            match self.store.upsert_media(&media).await {
                Ok(()) if media.has_keys() => self.media_ready.notify_one(),
                Ok(()) => {}
                Err(e) => error!(session = %ctx.name, msg_id = %info.id, "media insert failed: {e}"),
            }
        }
    }

    async fn persist_history(&self, ctx: &SessionContext, conversations: &[HistoryConversation]) {
        let sid = ctx.id.as_str();
        let mut messages = 0usize;
        for conv in conversations {
            let chat = ChatRecord {
                session_id: sid.to_string(),
                jid: conv.jid.clone(),
                name: conv.name.clone(),
                unread_count: conv.unread_count,
                unread_mention_count: conv.unread_mention_count,
                ephemeral_expiration: conv.ephemeral_expiration,
                read_only: conv.read_only,
                locked: conv.locked,
                suspended: conv.suspended,
                archived: conv.archived,
                pinned: conv.pinned,
                muted_until: conv.muted_until,
                last_message_at: conv.last_message_at,
            };
            self.log_err(ctx, "chat", self.store.upsert_chat(&chat).await);
            for msg in &conv.messages {
                if ctx.cancel.is_cancelled() {
                    return;
                }
                self.persist_message(ctx, &msg.info, &msg.payload, None).await;
                messages += 1;
            }
        }
        info!(
            session = %ctx.name,
            conversations = conversations.len(),
            messages,
            "history sync stored"
        );
    }

    fn log_err<T>(&self, ctx: &SessionContext, what: &str, result: Result<T, GatewayError>) {
        if let Err(e) = result {
            error!(session = %ctx.name, "{what} update failed: {e}");
        }
    }
}

/// Bounded per-session queue with a single consumer.
#[derive(Clone)]
pub struct Mailbox {
    tx: mpsc::Sender<RawEvent>,
}

impl Mailbox {
    /// Start the worker. It runs until the session is cancelled or every
    /// sender is gone; each lifecycle signal is handed to `on_signal`.
    pub fn spawn(
        dispatcher: Arc<Dispatcher>,
        ctx: SessionContext,
        capacity: usize,
        tracker: &TaskTracker,
        on_signal: SignalHandler,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<RawEvent>(capacity.max(1));
        tracker.spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    ev = rx.recv() => match ev {
                        Some(ev) => ev,
                        None => break,
                    },
                };
                if let Some(signal) = dispatcher.handle(&ctx, event).await {
                    on_signal(signal).await;
                }
            }
            debug!(session = %ctx.name, "event worker stopped");
        });
        Self { tx }
    }

    /// Enqueue an event, waiting for room if the worker is behind.
    pub async fn push(&self, event: RawEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("event dropped: session worker stopped");
        }
    }

    /// Callback to register on a protocol client.
    pub fn handler(&self) -> EventHandler {
        let tx = self.tx.clone();
        Arc::new(move |event: RawEvent| {
            let tx = tx.clone();
            Box::pin(async move {
                if tx.send(event).await.is_err() {
                    debug!("event dropped: session worker stopped");
                }
            })
        })
    }
}

#[cfg(test)]
mod tests;
