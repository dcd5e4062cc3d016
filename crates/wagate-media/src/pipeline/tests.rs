use super::*;
use crate::MemoryObjectStore;
use async_trait::async_trait;
use chrono::TimeZone;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use wagate_core::{
    protocol::{OutgoingContent, QrEvent, SendReceipt, UploadedMedia},
    traits::EventHandler,
};

/// Protocol double: serves fixed bytes, or fails with the configured error.
#[derive(Default)]
struct MockClient {
    expired: bool,
    downloads: AtomicUsize,
    reasks: Mutex<Vec<String>>,
}

#[async_trait]
impl ProtocolClient for MockClient {
    fn device_jid(&self) -> Option<String> {
        Some("100@s.whatsapp.net".into())
    }
    fn is_connected(&self) -> bool {
        true
    }
    fn add_event_handler(&self, _handler: EventHandler) {}
    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>, GatewayError> {
        Err(GatewayError::Protocol("paired".into()))
    }
    async fn connect(&self) -> Result<(), GatewayError> {
        Ok(())
    }
    async fn disconnect(&self) {}
    async fn logout(&self) -> Result<(), GatewayError> {
        Ok(())
    }
    async fn delete_device(&self) -> Result<(), GatewayError> {
        Ok(())
    }
    async fn pair_phone(&self, _phone: &str) -> Result<String, GatewayError> {
        Ok("ABCDEFGH".into())
    }
    async fn send_message(
        &self,
        _to: &str,
        _content: OutgoingContent,
    ) -> Result<SendReceipt, GatewayError> {
        Ok(SendReceipt::default())
    }
    async fn upload(&self, _data: Vec<u8>, _kind: MediaKind) -> Result<UploadedMedia, GatewayError> {
        Ok(UploadedMedia::default())
    }
    async fn download_media(&self, keys: &MediaKeys) -> Result<Vec<u8>, GatewayError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.expired {
            return Err(GatewayError::MediaExpired(keys.direct_path.clone()));
        }
        Ok(vec![0xAB; keys.file_length as usize])
    }
    async fn request_unavailable_message(
        &self,
        _chat: &str,
        _sender: &str,
        message_id: &str,
    ) -> Result<(), GatewayError> {
        self.reasks.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

fn pending(msg_id: &str, minute: u32) -> MediaRecord {
    MediaRecord {
        id: format!("id-{msg_id}"),
        session_id: "s1".into(),
        msg_id: msg_id.into(),
        chat_jid: "5511@s.whatsapp.net".into(),
        sender_jid: "5511@s.whatsapp.net".into(),
        direction: Direction::Received,
        media_type: "image".into(),
        mime_type: "image/jpeg".into(),
        file_size: 42,
        file_name: None,
        wa_direct_path: "/v/t62/abc".into(),
        wa_media_key: vec![1; 32],
        wa_file_sha256: vec![2; 32],
        wa_file_enc_sha256: vec![3; 32],
        wa_media_key_timestamp: 1_736_078_400,
        width: None,
        height: None,
        storage_key: None,
        storage_url: None,
        stored_at: None,
        downloaded: false,
        download_error: None,
        download_attempts: 0,
        created_at: Utc.with_ymd_and_hms(2025, 1, 5, 10, minute, 0).unwrap(),
    }
}

async fn setup() -> (Arc<MediaPipeline>, Store, Arc<MemoryObjectStore>) {
    let store = Store::in_memory().await.unwrap();
    let objects = Arc::new(MemoryObjectStore::new("media"));
    let pipeline = Arc::new(MediaPipeline::new(
        store.clone(),
        objects.clone(),
        MediaConfig::default(),
        Duration::from_secs(60),
        TaskTracker::new(),
    ));
    (pipeline, store, objects)
}

#[tokio::test]
async fn test_batch_stores_pending_media_under_dated_key() {
    let (pipeline, store, objects) = setup().await;
    store.upsert_media(&pending("MID2", 0)).await.unwrap();
    let client = MockClient::default();

    let outcome = pipeline
        .run_batch(&client, "s1", 10, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, BatchOutcome { stored: 1, failed: 0 });

    let row = store.get_media("s1", "MID2").await.unwrap().unwrap();
    assert!(row.downloaded);
    assert_eq!(
        row.storage_key.as_deref(),
        Some("s1/received/2025/01/05/MID2_image.jpg")
    );
    assert_eq!(
        row.storage_url.as_deref(),
        Some("memory://media/s1/received/2025/01/05/MID2_image.jpg")
    );
    assert!(row.stored_at.is_some());
    let bytes = objects
        .get("s1/received/2025/01/05/MID2_image.jpg")
        .await
        .unwrap();
    assert_eq!(bytes.len(), 42);
    assert_eq!(
        objects
            .content_type("s1/received/2025/01/05/MID2_image.jpg")
            .await
            .as_deref(),
        Some("image/jpeg")
    );
}

#[tokio::test]
async fn test_expired_media_counts_attempt_and_reasks_sender() {
    let (pipeline, store, objects) = setup().await;
    store.upsert_media(&pending("MID3", 0)).await.unwrap();
    let client = MockClient {
        expired: true,
        ..Default::default()
    };

    let outcome = pipeline
        .run_batch(&client, "s1", 10, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, BatchOutcome { stored: 0, failed: 1 });

    let row = store.get_media("s1", "MID3").await.unwrap().unwrap();
    assert!(!row.downloaded);
    assert_eq!(row.download_attempts, 1);
    assert!(row.download_error.unwrap().contains("expired"));
    assert_eq!(*client.reasks.lock().unwrap(), vec!["MID3".to_string()]);
    assert!(objects.is_empty().await);
}

#[tokio::test]
async fn test_rows_past_attempt_cap_leave_the_scan() {
    let (pipeline, store, _) = setup().await;
    let mut row = pending("MID4", 0);
    row.download_attempts = 3;
    store.upsert_media(&row).await.unwrap();
    let client = MockClient::default();

    let outcome = pipeline
        .run_batch(&client, "s1", 10, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, BatchOutcome::default());
    assert_eq!(client.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_batch_respects_size_and_order() {
    let (pipeline, store, _) = setup().await;
    for (i, id) in ["C", "A", "B"].iter().enumerate() {
        // created_at minute decides age: C oldest.
        store.upsert_media(&pending(id, i as u32)).await.unwrap();
    }
    let client = MockClient::default();
    let outcome = pipeline
        .run_batch(&client, "s1", 2, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.stored, 2);
    assert!(store.get_media("s1", "C").await.unwrap().unwrap().downloaded);
    assert!(store.get_media("s1", "A").await.unwrap().unwrap().downloaded);
    assert!(!store.get_media("s1", "B").await.unwrap().unwrap().downloaded);
}

#[tokio::test]
async fn test_cancelled_batch_does_nothing() {
    let (pipeline, store, _) = setup().await;
    store.upsert_media(&pending("MID5", 0)).await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let client = MockClient::default();
    let outcome = pipeline.run_batch(&client, "s1", 10, &cancel).await.unwrap();
    assert_eq!(outcome, BatchOutcome::default());
    assert_eq!(client.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_retry_runs_detached_and_ignores_cap() {
    let store = Store::in_memory().await.unwrap();
    let objects = Arc::new(MemoryObjectStore::new("media"));
    let tracker = TaskTracker::new();
    let pipeline = Arc::new(MediaPipeline::new(
        store.clone(),
        objects,
        MediaConfig::default(),
        Duration::from_secs(60),
        tracker.clone(),
    ));
    let mut row = pending("MID6", 0);
    row.download_attempts = 5;
    store.upsert_media(&row).await.unwrap();

    let client: Arc<dyn ProtocolClient> = Arc::new(MockClient::default());
    pipeline
        .spawn_retry(client, "s1", "MID6", CancellationToken::new())
        .await
        .unwrap();
    tracker.close();
    tracker.wait().await;

    assert!(store.get_media("s1", "MID6").await.unwrap().unwrap().downloaded);
}

#[tokio::test]
async fn test_retry_unknown_message_is_not_found() {
    let (pipeline, _, _) = setup().await;
    let client: Arc<dyn ProtocolClient> = Arc::new(MockClient::default());
    let err = pipeline
        .spawn_retry(client, "s1", "nope", CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
}

#[tokio::test]
async fn test_capture_sent_writes_stored_row() {
    let (pipeline, store, objects) = setup().await;
    let record = pipeline
        .capture_sent(SentMedia {
            session_id: "s1".into(),
            msg_id: "OUT1".into(),
            chat_jid: "5511@s.whatsapp.net".into(),
            sender_jid: "100@s.whatsapp.net".into(),
            kind: MediaKind::Document,
            mime_type: "application/pdf".into(),
            file_name: Some("report.pdf".into()),
            data: b"%PDF-1.7".to_vec(),
        })
        .await
        .unwrap();

    let key = record.storage_key.clone().unwrap();
    assert!(key.starts_with("s1/sent/"));
    assert!(key.ends_with("/OUT1_document.pdf"));
    assert_eq!(objects.get(&key).await.unwrap(), b"%PDF-1.7");

    let row = store.get_media("s1", "OUT1").await.unwrap().unwrap();
    assert!(row.downloaded);
    assert_eq!(row.direction, Direction::Sent);
    assert_eq!(row.storage_key, Some(key));
    assert_eq!(row.file_size, 8);
}

#[tokio::test]
async fn test_media_info_presigns_stored_rows() {
    let (pipeline, store, _) = setup().await;
    store.upsert_media(&pending("MID7", 0)).await.unwrap();

    let (row, url) = pipeline.media_info("s1", "MID7").await.unwrap();
    assert!(!row.downloaded);
    assert!(url.is_none());

    pipeline
        .run_batch(&MockClient::default(), "s1", 1, &CancellationToken::new())
        .await
        .unwrap();
    let (_, url) = pipeline.media_info("s1", "MID7").await.unwrap();
    assert_eq!(
        url.as_deref(),
        Some("memory://media/s1/received/2025/01/05/MID7_image.jpg?expires=60")
    );
}
