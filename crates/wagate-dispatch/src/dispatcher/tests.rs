use super::*;
use std::sync::Mutex;
use std::time::Duration;
use wagate_core::{
    config::{SseConfig, WebhookConfig},
    protocol::{HistoryMessage, MediaAttachment, ReceiptType},
    records::{MessageStatus, MessageType},
};

struct Harness {
    dispatcher: Arc<Dispatcher>,
    store: Store,
    ctx: SessionContext,
    media_ready: Arc<Notify>,
}

async fn harness() -> Harness {
    let store = Store::in_memory().await.unwrap();
    let session = store.create_session("alpha").await.unwrap();
    let tracker = TaskTracker::new();
    let webhooks = WebhookSender::new(
        &WebhookConfig {
            allow_loopback: true,
            ..Default::default()
        },
        store.clone(),
        tracker,
    )
    .unwrap();
    let hub = SseHub::spawn(&SseConfig::default(), CancellationToken::new());
    let media_ready = Arc::new(Notify::new());
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        webhooks,
        hub,
        Arc::clone(&media_ready),
    ));
    Harness {
        dispatcher,
        store,
        ctx: SessionContext {
            id: session.id,
            name: session.name,
            cancel: CancellationToken::new(),
        },
        media_ready,
    }
}

fn info(id: &str, ts: i64) -> MessageInfo {
    MessageInfo {
        id: id.into(),
        chat: "15550001111@s.whatsapp.net".into(),
        sender: "15550001111@s.whatsapp.net".into(),
        timestamp: ts,
        push_name: Some("Ana".into()),
        ..Default::default()
    }
}

fn text_message(id: &str, body: &str) -> RawEvent {
    RawEvent::Message {
        info: info(id, 1_736_000_000),
        payload: MessagePayload::text(body),
    }
}

fn receipt(ids: &[&str], receipt_type: ReceiptType) -> RawEvent {
    RawEvent::Receipt {
        chat: "15550001111@s.whatsapp.net".into(),
        sender: "15550001111@s.whatsapp.net".into(),
        receipt_type,
        message_ids: ids.iter().map(|s| s.to_string()).collect(),
        timestamp: 1_736_000_100,
    }
}

#[tokio::test]
async fn test_inbound_text_is_stored_and_streamed() {
    let h = harness().await;
    let mut sub = h.dispatcher.hub().register(&h.ctx.id).await.unwrap();

    let signal = h.dispatcher.handle(&h.ctx, text_message("MID1", "hola")).await;
    assert!(signal.is_none());

    let stored = h.store.get_message(&h.ctx.id, "MID1").await.unwrap().unwrap();
    assert_eq!(stored.msg_type, MessageType::Text);
    assert_eq!(stored.content, "hola");
    assert_eq!(stored.status, MessageStatus::Delivered);
    assert!(stored.raw.is_some());

    let payload = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap()
        .unwrap();
    let envelope: Envelope = serde_json::from_str(&payload).unwrap();
    assert_eq!(envelope.event, "message.received");
    assert_eq!(envelope.session_id, h.ctx.id);
    assert_eq!(envelope.data["message_id"], "MID1");
}

#[tokio::test]
async fn test_media_message_queues_download() {
    let h = harness().await;
    let payload = MessagePayload {
        image: Some(MediaAttachment {
            direct_path: "/v/t62/abc".into(),
            media_key: vec![1; 32],
            file_sha256: vec![2; 32],
            file_enc_sha256: vec![3; 32],
            file_length: 2048,
            mimetype: Some("image/jpeg".into()),
            caption: Some("look".into()),
            ..Default::default()
        }),
        ..Default::default()
    };
    let notified = h.media_ready.notified();
    h.dispatcher
        .handle(
            &h.ctx,
            RawEvent::Message {
                info: info("MID2", 1_736_000_000),
                payload,
            },
        )
        .await;

    tokio::time::timeout(Duration::from_secs(1), notified)
        .await
        .expect("media scanner was not woken");
    let media = h.store.get_media(&h.ctx.id, "MID2").await.unwrap().unwrap();
    assert!(!media.downloaded);
    assert_eq!(media.media_type, "image");
    let pending = h.store.pending_media(&h.ctx.id, 3, 10).await.unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_receipts_never_downgrade() {
    let h = harness().await;
    h.dispatcher.handle(&h.ctx, text_message("MID3", "x")).await;
    h.dispatcher
        .handle(&h.ctx, receipt(&["MID3"], ReceiptType::Read))
        .await;
    h.dispatcher
        .handle(&h.ctx, receipt(&["MID3"], ReceiptType::Delivery))
        .await;

    let stored = h.store.get_message(&h.ctx.id, "MID3").await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Read);
}

#[tokio::test]
async fn test_connected_updates_status_and_signals() {
    let h = harness().await;
    let signal = h.dispatcher.handle(&h.ctx, RawEvent::Connected).await;
    assert_eq!(signal, Some(SessionSignal::Connected));
    let session = h.store.get_session(&h.ctx.id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Connected);

    let signal = h
        .dispatcher
        .handle(
            &h.ctx,
            RawEvent::LoggedOut {
                reason: "device removed".into(),
                on_connect: false,
            },
        )
        .await;
    assert_eq!(
        signal,
        Some(SessionSignal::LoggedOut {
            reason: "device removed".into()
        })
    );
    let session = h.store.get_session(&h.ctx.id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Disconnected);
    assert!(session.device_jid.is_none());
}

#[tokio::test]
async fn test_history_then_live_message_is_stored_once() {
    let h = harness().await;
    let conversation = HistoryConversation {
        jid: "15550001111@s.whatsapp.net".into(),
        name: Some("Ana".into()),
        unread_count: 1,
        last_message_at: 1_736_000_000,
        messages: vec![HistoryMessage {
            info: info("MID4", 1_736_000_000),
            payload: MessagePayload::text("hi"),
        }],
        ..Default::default()
    };
    h.dispatcher
        .handle(
            &h.ctx,
            RawEvent::HistorySync {
                sync_type: "recent".into(),
                progress: Some(100),
                conversations: vec![conversation],
            },
        )
        .await;
    h.dispatcher.handle(&h.ctx, text_message("MID4", "hi")).await;

    assert_eq!(h.store.count_messages(&h.ctx.id).await.unwrap(), 1);
    let chats = h.store.list_chats(&h.ctx.id).await.unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].name.as_deref(), Some("Ana"));
}

#[tokio::test]
async fn test_revoke_keeps_history() {
    let h = harness().await;
    h.dispatcher.handle(&h.ctx, text_message("MID5", "oops")).await;
    let revoke = RawEvent::Message {
        info: info("MID6", 1_736_000_050),
        payload: MessagePayload {
            protocol: Some(ProtocolAction::Revoke {
                target_id: "MID5".into(),
            }),
            ..Default::default()
        },
    };
    h.dispatcher.handle(&h.ctx, revoke).await;

    let stored = h.store.get_message(&h.ctx.id, "MID5").await.unwrap().unwrap();
    assert_eq!(stored.content, "oops");
    assert!(h.store.get_message(&h.ctx.id, "MID6").await.unwrap().is_none());
}

#[tokio::test]
async fn test_edit_rewrites_content() {
    let h = harness().await;
    h.dispatcher.handle(&h.ctx, text_message("MID7", "helo")).await;
    let edit = RawEvent::Message {
        info: info("MID8", 1_736_000_060),
        payload: MessagePayload {
            protocol: Some(ProtocolAction::Edit {
                target_id: "MID7".into(),
                text: "hello".into(),
            }),
            ..Default::default()
        },
    };
    h.dispatcher.handle(&h.ctx, edit).await;

    let stored = h.store.get_message(&h.ctx.id, "MID7").await.unwrap().unwrap();
    assert_eq!(stored.content, "hello");
    assert!(stored.is_edit);
}

#[tokio::test]
async fn test_edit_before_original_is_applied_on_arrival() {
    let h = harness().await;
    let edit = RawEvent::Message {
        info: info("EDIT1", 1_736_000_060),
        payload: MessagePayload {
            protocol: Some(ProtocolAction::Edit {
                target_id: "ORIG".into(),
                text: "edited".into(),
            }),
            ..Default::default()
        },
    };
    h.dispatcher.handle(&h.ctx, edit).await;
    assert!(h.store.get_message(&h.ctx.id, "ORIG").await.unwrap().is_none());

    h.dispatcher.handle(&h.ctx, text_message("ORIG", "original")).await;

    let stored = h.store.get_message(&h.ctx.id, "ORIG").await.unwrap().unwrap();
    assert_eq!(stored.content, "edited");
    assert!(stored.is_edit);
    let edit_row = h.store.get_message(&h.ctx.id, "EDIT1").await.unwrap().unwrap();
    assert!(edit_row.is_edit);
    assert_eq!(edit_row.edit_target_id.as_deref(), Some("ORIG"));
    assert_eq!(edit_row.content, "edited");
}

#[tokio::test]
async fn test_unknown_event_is_dropped() {
    let h = harness().await;
    let mut sub = h.dispatcher.hub().register(&h.ctx.id).await.unwrap();
    let signal = h
        .dispatcher
        .handle(
            &h.ctx,
            RawEvent::Unknown {
                name: "mystery".into(),
            },
        )
        .await;
    assert!(signal.is_none());
    // Follow with a known event; it must be the first thing the subscriber sees.
    h.dispatcher.handle(&h.ctx, RawEvent::Connected).await;
    let payload = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap()
        .unwrap();
    let envelope: Envelope = serde_json::from_str(&payload).unwrap();
    assert_eq!(envelope.event, "session.connected");
}

#[tokio::test]
async fn test_mailbox_preserves_order_and_forwards_signals() {
    let h = harness().await;
    let tracker = TaskTracker::new();
    let signals = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&signals);
    let on_signal: SignalHandler = Arc::new(move |signal| {
        let seen = Arc::clone(&seen);
        Box::pin(async move {
            seen.lock().unwrap().push(signal);
        })
    });
    let mailbox = Mailbox::spawn(
        Arc::clone(&h.dispatcher),
        h.ctx.clone(),
        4,
        &tracker,
        on_signal,
    );

    let handler = mailbox.handler();
    mailbox.push(RawEvent::Connected).await;
    handler(text_message("MID9", "first")).await;
    handler(receipt(&["MID9"], ReceiptType::Read)).await;

    drop(handler);
    drop(mailbox);
    tracker.close();
    tokio::time::timeout(Duration::from_secs(5), tracker.wait())
        .await
        .unwrap();

    let stored = h.store.get_message(&h.ctx.id, "MID9").await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Read);
    assert_eq!(*signals.lock().unwrap(), vec![SessionSignal::Connected]);
}

#[tokio::test]
async fn test_mailbox_stops_on_cancel() {
    let h = harness().await;
    let tracker = TaskTracker::new();
    let on_signal: SignalHandler = Arc::new(|_| Box::pin(async {}));
    let _mailbox = Mailbox::spawn(
        Arc::clone(&h.dispatcher),
        h.ctx.clone(),
        4,
        &tracker,
        on_signal,
    );
    h.ctx.cancel.cancel();
    tracker.close();
    tokio::time::timeout(Duration::from_secs(2), tracker.wait())
        .await
        .unwrap();
}
