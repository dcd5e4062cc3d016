use super::*;
use crate::testing::{eventually, Harness, DEVICE_JID};
use std::sync::atomic::Ordering;
use wagate_core::protocol::{MediaAttachment, MessageInfo, MessagePayload, RawEvent};
use wagate_core::traits::ObjectStore;

#[tokio::test]
async fn test_create_get_list() {
    let h = Harness::new().await;
    let s = h.registry.create("s1").await.unwrap();
    assert_eq!(s.name, "s1");
    assert_eq!(s.status, SessionStatus::Disconnected);
    assert!(s.qr_code.is_empty());
    assert_eq!(h.factory.provisioned.lock().unwrap().as_slice(), [s.id.clone()]);

    h.registry.create("s0").await.unwrap();
    assert_eq!(h.registry.names(), ["s0", "s1"]);
    assert_eq!(h.registry.get("s1").unwrap().id, s.id);
    assert!(h.store.get_session_by_name("s1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_duplicate_and_invalid_names() {
    let h = Harness::new().await;
    h.registry.create("s1").await.unwrap();
    assert!(matches!(
        h.registry.create("s1").await,
        Err(GatewayError::SessionAlreadyExists(_))
    ));
    assert!(matches!(
        h.registry.create("bad name").await,
        Err(GatewayError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.registry.create("").await,
        Err(GatewayError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.registry.get("nope"),
        Err(GatewayError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_create_then_delete_leaves_no_trace() {
    let h = Harness::new().await;
    let before = h.registry.len();
    let s = h.registry.create("tmp").await.unwrap();
    h.registry.delete("tmp").await.unwrap();

    assert_eq!(h.registry.len(), before);
    assert!(matches!(
        h.registry.get("tmp"),
        Err(GatewayError::SessionNotFound(_))
    ));
    assert!(h.store.get_session(&s.id).await.unwrap().is_none());
    assert!(h.factory.client(&s.id).called("delete_device"));
}

#[tokio::test]
async fn test_failed_device_delete_keeps_session() {
    let h = Harness::new().await;
    h.registry.create("s1").await.unwrap();
    let client = h.client("s1");
    client.fail_delete.store(true, Ordering::SeqCst);

    assert!(h.registry.delete("s1").await.is_err());
    assert!(h.registry.get("s1").is_ok());

    client.fail_delete.store(false, Ordering::SeqCst);
    h.registry.delete("s1").await.unwrap();
    assert!(h.registry.get("s1").is_err());
}

#[tokio::test]
async fn test_qr_flow_to_connected() {
    let h = Harness::new().await;
    h.registry.create("s1").await.unwrap();
    let client = h.client("s1");

    let outcome = h.registry.connect("s1").await.unwrap();
    assert!(outcome.awaiting_qr);
    assert_eq!(outcome.session.status, SessionStatus::Connecting);

    client.send_qr(QrEvent::Code("2@abc,def".into())).await;
    assert!(eventually(|| h.registry.get("s1").unwrap().status == SessionStatus::Qr).await);
    let s = h.registry.get("s1").unwrap();
    assert_eq!(s.qr_code, "2@abc,def");

    client.complete_pairing().await;
    assert!(eventually(|| h.registry.get("s1").unwrap().status == SessionStatus::Connected).await);
    let s = h.registry.get("s1").unwrap();
    assert!(s.qr_code.is_empty());
    assert_eq!(s.device_jid.as_deref(), Some(DEVICE_JID));

    let stored = h.store.get_session(&s.id).await.unwrap().unwrap();
    assert_eq!(stored.device_jid.as_deref(), Some(DEVICE_JID));
}

#[tokio::test]
async fn test_late_qr_code_after_connect_is_ignored() {
    let h = Harness::new().await;
    h.registry.create("s1").await.unwrap();
    let client = h.client("s1");
    h.registry.connect("s1").await.unwrap();

    // Pairing finishes on the event stream while the qr channel still holds a code.
    client.set_device(Some(DEVICE_JID));
    client.go_online();
    client.emit(RawEvent::Connected).await;
    assert!(eventually(|| h.registry.get("s1").unwrap().status == SessionStatus::Connected).await);

    client.send_qr(QrEvent::Code("2@stale".into())).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let s = h.registry.get("s1").unwrap();
    assert_eq!(s.status, SessionStatus::Connected);
    assert!(s.qr_code.is_empty());
    let stored = h.store.get_session(&s.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Connected);
}

#[tokio::test]
async fn test_qr_timeout_returns_to_disconnected() {
    let h = Harness::new().await;
    h.registry.create("s1").await.unwrap();
    let client = h.client("s1");
    h.registry.connect("s1").await.unwrap();

    client.send_qr(QrEvent::Code("2@first".into())).await;
    assert!(eventually(|| h.registry.get("s1").unwrap().status == SessionStatus::Qr).await);
    client.send_qr(QrEvent::Timeout).await;
    assert!(eventually(|| h.registry.get("s1").unwrap().status == SessionStatus::Disconnected).await);
    assert!(h.registry.get("s1").unwrap().qr_code.is_empty());
    assert!(client.called("disconnect"));
}

#[tokio::test]
async fn test_paired_session_connects_directly() {
    let h = Harness::new().await;
    h.registry.create("s1").await.unwrap();
    let client = h.client("s1");
    client.set_device(Some(DEVICE_JID));

    let outcome = h.registry.connect("s1").await.unwrap();
    assert!(!outcome.awaiting_qr);
    assert!(eventually(|| h.registry.get("s1").unwrap().status == SessionStatus::Connected).await);

    let again = h.registry.connect("s1").await.unwrap();
    assert_eq!(again.session.status, SessionStatus::Connected);
    assert!(!again.awaiting_qr);
}

#[tokio::test]
async fn test_connect_failure_sets_disconnected() {
    let h = Harness::new().await;
    h.registry.create("s1").await.unwrap();
    h.client("s1").fail_connect.store(true, Ordering::SeqCst);

    let err = h.registry.connect("s1").await.unwrap_err();
    assert!(matches!(err, GatewayError::Protocol(_)));
    assert_eq!(h.registry.get("s1").unwrap().status, SessionStatus::Disconnected);
}

#[tokio::test]
async fn test_logout_clears_device() {
    let h = Harness::new().await;
    let s = h.registry.create("s1").await.unwrap();
    let client = h.client("s1");
    client.set_device(Some(DEVICE_JID));
    h.registry.connect("s1").await.unwrap();
    assert!(eventually(|| h.registry.get("s1").unwrap().status == SessionStatus::Connected).await);

    let after = h.registry.logout("s1").await.unwrap();
    assert_eq!(after.status, SessionStatus::Disconnected);
    assert!(after.device_jid.is_none());
    assert!(client.called("logout"));
    let stored = h.store.get_session(&s.id).await.unwrap().unwrap();
    assert!(stored.device_jid.is_none());
}

#[tokio::test]
async fn test_restart_keeps_device() {
    let h = Harness::new().await;
    h.registry.create("s1").await.unwrap();
    let client = h.client("s1");
    client.set_device(Some(DEVICE_JID));
    h.registry.connect("s1").await.unwrap();

    let outcome = h.registry.restart("s1").await.unwrap();
    assert!(!outcome.awaiting_qr);
    assert!(client.called("disconnect"));
    assert!(eventually(|| h.registry.get("s1").unwrap().status == SessionStatus::Connected).await);
    assert_eq!(client.calls.lock().unwrap().iter().filter(|c| *c == "connect").count(), 2);
}

#[tokio::test]
async fn test_pair_phone_formats_code() {
    let h = Harness::new().await;
    h.registry.create("s1").await.unwrap();
    let code = h.registry.pair_phone("s1", "+55 11 99999-0000").await.unwrap();
    assert_eq!(code, "ABCD-1234");
    let client = h.client("s1");
    assert!(client.called("connect"));
    assert!(client.called("pair_phone:5511999990000"));
    assert_eq!(h.registry.get("s1").unwrap().phone.as_deref(), Some("5511999990000"));
}

#[tokio::test]
async fn test_pair_phone_rejected_when_paired_or_invalid() {
    let h = Harness::new().await;
    h.registry.create("s1").await.unwrap();
    assert!(matches!(
        h.registry.pair_phone("s1", "12").await,
        Err(GatewayError::InvalidPhone(_))
    ));
    h.client("s1").set_device(Some(DEVICE_JID));
    assert!(matches!(
        h.registry.pair_phone("s1", "5511999990000").await,
        Err(GatewayError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_logged_out_event_clears_device() {
    let h = Harness::new().await;
    h.registry.create("s1").await.unwrap();
    let client = h.client("s1");
    client.set_device(Some(DEVICE_JID));
    h.registry.connect("s1").await.unwrap();
    assert!(eventually(|| h.registry.get("s1").unwrap().status == SessionStatus::Connected).await);

    client.set_device(None);
    client
        .emit(RawEvent::LoggedOut {
            reason: "device removed".into(),
            on_connect: false,
        })
        .await;
    assert!(eventually(|| h.registry.get("s1").unwrap().device_jid.is_none()).await);
    assert_eq!(h.registry.get("s1").unwrap().status, SessionStatus::Disconnected);
}

#[tokio::test]
async fn test_restore_reconnects_paired_sessions() {
    let store = Store::in_memory().await.unwrap();
    let paired = store.create_session("paired").await.unwrap();
    store
        .set_session_device(&paired.id, Some(DEVICE_JID))
        .await
        .unwrap();
    store
        .update_session_status(&paired.id, SessionStatus::Connected)
        .await
        .unwrap();
    store.create_session("fresh").await.unwrap();

    let h = Harness::with_store(store).await;
    h.factory.client(&paired.id).set_device(Some(DEVICE_JID));
    assert_eq!(h.registry.restore().await.unwrap(), 2);
    assert_eq!(h.registry.names(), ["fresh", "paired"]);

    assert!(eventually(|| h.registry.get("paired").unwrap().status == SessionStatus::Connected).await);
    assert_eq!(h.registry.get("fresh").unwrap().status, SessionStatus::Disconnected);
    assert!(!h.client("fresh").called("connect"));
}

#[tokio::test]
async fn test_scan_downloads_pending_media() {
    let h = Harness::new().await;
    let s = h.registry.create("s1").await.unwrap();
    let client = h.client("s1");
    client.set_device(Some(DEVICE_JID));
    h.registry.connect("s1").await.unwrap();
    client
        .blobs
        .lock()
        .unwrap()
        .insert("/v/t62/img".into(), b"jpeg-bytes".to_vec());

    client
        .emit(RawEvent::Message {
            info: MessageInfo {
                id: "MID2".into(),
                chat: "5511888@s.whatsapp.net".into(),
                sender: "5511888@s.whatsapp.net".into(),
                timestamp: 1_736_035_200,
                ..Default::default()
            },
            payload: MessagePayload {
                image: Some(MediaAttachment {
                    direct_path: "/v/t62/img".into(),
                    media_key: vec![9; 32],
                    file_length: 10,
                    mimetype: Some("image/jpeg".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        })
        .await;

    let store = h.store.clone();
    let sid = s.id.clone();
    let mut found = false;
    for _ in 0..200 {
        if store.get_media(&sid, "MID2").await.unwrap().is_some() {
            found = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(found);

    let outcome = h.registry.scan_media().await;
    assert_eq!(outcome.stored, 1);
    let media = h.store.get_media(&s.id, "MID2").await.unwrap().unwrap();
    assert!(media.downloaded);
    let key = media.storage_key.unwrap();
    assert!(key.starts_with(&format!("{}/received/2025/01/05/MID2_image", s.id)));
    assert_eq!(h.objects.get(&key).await.unwrap(), b"jpeg-bytes");
}

#[tokio::test]
async fn test_scan_skips_disconnected_sessions() {
    let h = Harness::new().await;
    h.registry.create("s1").await.unwrap();
    let outcome = h.registry.scan_media().await;
    assert_eq!(outcome.stored + outcome.failed, 0);
}
