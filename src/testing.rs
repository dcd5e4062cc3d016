//! In-process protocol backend and component wiring for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use wagate_core::{
    config::{MediaConfig, SseConfig, WebhookConfig},
    error::GatewayError,
    protocol::{
        ChatPresenceState, GroupInfo, MediaKeys, MediaKind, OutgoingContent, QrEvent, RawEvent,
        SendReceipt, UploadedMedia,
    },
    traits::{EventHandler, ObjectStore, ProtocolClient, ProtocolFactory},
};
use wagate_dispatch::{Dispatcher, SseHub, WebhookSender};
use wagate_media::{MediaPipeline, MemoryObjectStore};
use wagate_store::Store;

use crate::registry::Registry;

pub const DEVICE_JID: &str = "5511999990000:7@s.whatsapp.net";

#[derive(Default)]
pub struct MockClient {
    connected: AtomicBool,
    device: Mutex<Option<String>>,
    handler: Mutex<Option<EventHandler>>,
    qr_tx: Mutex<Option<mpsc::Sender<QrEvent>>>,
    pub fail_connect: AtomicBool,
    pub fail_delete: AtomicBool,
    pub sent: Mutex<Vec<(String, OutgoingContent)>>,
    pub calls: Mutex<Vec<String>>,
    pub blobs: Mutex<HashMap<String, Vec<u8>>>,
    counter: AtomicUsize,
}

impl MockClient {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == call)
    }

    pub fn set_device(&self, jid: Option<&str>) {
        *self.device.lock().unwrap() = jid.map(str::to_string);
    }

    pub async fn emit(&self, event: RawEvent) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(event).await;
        }
    }

    pub async fn send_qr(&self, event: QrEvent) {
        let tx = self.qr_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// What a phone scanning the QR code triggers.
    pub async fn complete_pairing(&self) {
        self.set_device(Some(DEVICE_JID));
        self.connected.store(true, Ordering::SeqCst);
        self.send_qr(QrEvent::Success).await;
        self.emit(RawEvent::PairSuccess {
            jid: DEVICE_JID.into(),
            business_name: None,
            platform: "android".into(),
        })
        .await;
        self.emit(RawEvent::Connected).await;
    }

    pub fn go_online(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    fn next_id(&self) -> usize {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    fn device_jid(&self) -> Option<String> {
        self.device.lock().unwrap().clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn add_event_handler(&self, handler: EventHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>, GatewayError> {
        let (tx, rx) = mpsc::channel(8);
        *self.qr_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn connect(&self) -> Result<(), GatewayError> {
        self.record("connect");
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(GatewayError::Protocol("websocket refused".into()));
        }
        if self.device_jid().is_some() {
            self.connected.store(true, Ordering::SeqCst);
            self.emit(RawEvent::Connected).await;
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.record("disconnect");
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn logout(&self) -> Result<(), GatewayError> {
        self.record("logout");
        self.connected.store(false, Ordering::SeqCst);
        self.set_device(None);
        Ok(())
    }

    async fn delete_device(&self) -> Result<(), GatewayError> {
        self.record("delete_device");
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(GatewayError::Database("device store locked".into()));
        }
        Ok(())
    }

    async fn pair_phone(&self, phone: &str) -> Result<String, GatewayError> {
        self.record(format!("pair_phone:{phone}"));
        Ok("abcd1234".into())
    }

    async fn send_message(
        &self,
        to: &str,
        content: OutgoingContent,
    ) -> Result<SendReceipt, GatewayError> {
        if !self.is_connected() {
            return Err(GatewayError::SessionNotConnected("mock".into()));
        }
        self.sent.lock().unwrap().push((to.to_string(), content));
        Ok(SendReceipt {
            id: format!("OUT{}", self.next_id()),
            timestamp: 1_736_000_000,
        })
    }

    async fn upload(&self, data: Vec<u8>, _kind: MediaKind) -> Result<UploadedMedia, GatewayError> {
        let n = self.next_id();
        Ok(UploadedMedia {
            url: format!("https://mmg.example/{n}"),
            direct_path: format!("/mock/{n}"),
            media_key: vec![1; 32],
            file_enc_sha256: vec![2; 32],
            file_sha256: vec![3; 32],
            file_length: data.len() as u64,
        })
    }

    async fn download_media(&self, keys: &MediaKeys) -> Result<Vec<u8>, GatewayError> {
        self.blobs
            .lock()
            .unwrap()
            .get(&keys.direct_path)
            .cloned()
            .ok_or_else(|| GatewayError::MediaExpired(keys.direct_path.clone()))
    }

    async fn request_unavailable_message(
        &self,
        _chat: &str,
        _sender: &str,
        message_id: &str,
    ) -> Result<(), GatewayError> {
        self.record(format!("reupload:{message_id}"));
        Ok(())
    }

    async fn send_presence(&self, available: bool) -> Result<(), GatewayError> {
        self.record(format!("presence:{available}"));
        Ok(())
    }

    async fn send_chat_presence(
        &self,
        chat: &str,
        state: ChatPresenceState,
    ) -> Result<(), GatewayError> {
        self.record(format!("chat_presence:{chat}:{state:?}"));
        Ok(())
    }

    async fn mark_read(
        &self,
        chat: &str,
        _sender: &str,
        message_ids: &[String],
    ) -> Result<(), GatewayError> {
        self.record(format!("read:{chat}:{}", message_ids.join(",")));
        Ok(())
    }

    async fn archive_chat(&self, chat: &str, archive: bool) -> Result<(), GatewayError> {
        self.record(format!("archive:{chat}:{archive}"));
        Ok(())
    }

    async fn group_create(
        &self,
        name: &str,
        participants: &[String],
    ) -> Result<GroupInfo, GatewayError> {
        Ok(GroupInfo {
            jid: "120363000000000001@g.us".into(),
            name: name.to_string(),
            participants: participants
                .iter()
                .map(|p| wagate_core::protocol::GroupParticipant {
                    jid: p.clone(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
    }

    async fn group_list(&self) -> Result<Vec<GroupInfo>, GatewayError> {
        Ok(vec![GroupInfo {
            jid: "120363000000000001@g.us".into(),
            name: "team".into(),
            ..Default::default()
        }])
    }
}

#[derive(Default)]
pub struct MockFactory {
    clients: Mutex<HashMap<String, Arc<MockClient>>>,
    pub provisioned: Mutex<Vec<String>>,
}

impl MockFactory {
    pub fn client(&self, session_id: &str) -> Arc<MockClient> {
        Arc::clone(
            self.clients
                .lock()
                .unwrap()
                .entry(session_id.to_string())
                .or_default(),
        )
    }
}

#[async_trait]
impl ProtocolFactory for MockFactory {
    fn name(&self) -> &str {
        "mock"
    }

    async fn provision(&self, session_id: &str) -> Result<(), GatewayError> {
        self.provisioned.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    async fn build(&self, session_id: &str) -> Result<Arc<dyn ProtocolClient>, GatewayError> {
        Ok(self.client(session_id))
    }
}

/// Every component wired over in-memory backends.
pub struct Harness {
    pub store: Store,
    pub factory: Arc<MockFactory>,
    pub objects: Arc<MemoryObjectStore>,
    pub registry: Arc<Registry>,
    pub media_ready: Arc<Notify>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(Store::in_memory().await.unwrap()).await
    }

    pub async fn with_store(store: Store) -> Self {
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let factory = Arc::new(MockFactory::default());
        let objects = Arc::new(MemoryObjectStore::new("media"));
        let media_ready = Arc::new(Notify::new());

        let webhook_config = WebhookConfig {
            allow_loopback: true,
            timeout_secs: 2,
            ..Default::default()
        };
        let webhooks = WebhookSender::new(&webhook_config, store.clone(), tracker.clone()).unwrap();
        let hub = SseHub::spawn(&SseConfig::default(), shutdown.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            webhooks,
            hub,
            Arc::clone(&media_ready),
        ));
        let object_store: Arc<dyn ObjectStore> = objects.clone();
        let media = Arc::new(MediaPipeline::new(
            store.clone(),
            object_store,
            MediaConfig::default(),
            Duration::from_secs(60),
            tracker.clone(),
        ));
        let registry = Registry::new(
            store.clone(),
            factory.clone(),
            dispatcher,
            media,
            64,
            tracker,
            shutdown.clone(),
        );
        Self {
            store,
            factory,
            objects,
            registry,
            media_ready,
            shutdown,
        }
    }

    pub fn client(&self, name: &str) -> Arc<MockClient> {
        let id = self.registry.get(name).unwrap().id;
        self.factory.client(&id)
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
