//! WhatsApp Web protocol adapter over `whatsapp-rust`.
//!
//! One [`WhatsAppClient`] per gateway session. Its keys live in the shared
//! device database, partitioned by session id. The bot is built lazily on
//! `connect` so the event sink and QR channel are wired before the first
//! frame arrives.

mod inbound;
mod outbound;
mod stanza;

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wacore::types::events::Event;
use wacore_binary::jid::Jid;
use wacore_binary::node::Node;
use wagate_core::{
    error::GatewayError,
    protocol::{
        ChatPresenceState, GroupInfo, MediaKeys, MediaKind, OutgoingContent, ParticipantAction,
        QrEvent, SendReceipt, UploadedMedia,
    },
    traits::{EventHandler, ProtocolClient, ProtocolFactory},
};
use whatsapp_rust::bot::Bot;
use whatsapp_rust::client::Client;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

use crate::device_store::{open_pool, SqlxDeviceStore};
use outbound::Downloadable;

/// Retry delays for outbound sends.
const SEND_RETRY_MS: [u64; 3] = [500, 1000, 2000];

/// Builds per-session clients over one shared device database.
pub struct WhatsAppFactory {
    pool: SqlitePool,
    device_name: String,
}

impl WhatsAppFactory {
    /// Open `{data_dir}/whatsapp.db`.
    pub async fn open(data_dir: &str, device_name: &str) -> Result<Self, GatewayError> {
        let dir = wagate_core::shellexpand(data_dir);
        std::fs::create_dir_all(&dir)?;
        let path = format!("{dir}/whatsapp.db");
        let pool = open_pool(&format!("sqlite:{path}"), 4).await?;
        info!(%path, "whatsapp device store ready");
        Ok(Self {
            pool,
            device_name: device_name.to_string(),
        })
    }
}

#[async_trait]
impl ProtocolFactory for WhatsAppFactory {
    fn name(&self) -> &str {
        "whatsapp-web"
    }

    async fn provision(&self, session_id: &str) -> Result<(), GatewayError> {
        SqlxDeviceStore::new(self.pool.clone(), session_id)
            .provision()
            .await
    }

    async fn build(&self, session_id: &str) -> Result<Arc<dyn ProtocolClient>, GatewayError> {
        Ok(Arc::new(WhatsAppClient {
            session_id: session_id.to_string(),
            store: Arc::new(SqlxDeviceStore::new(self.pool.clone(), session_id)),
            device_name: self.device_name.clone(),
            shared: Arc::new(Shared::default()),
            run: Mutex::new(None),
        }))
    }
}

/// State reachable from the library's event callback.
#[derive(Default)]
struct Shared {
    client: RwLock<Option<Arc<Client>>>,
    handler: RwLock<Option<EventHandler>>,
    qr_tx: Mutex<Option<mpsc::Sender<QrEvent>>>,
    connected: AtomicBool,
    device_jid: RwLock<Option<String>>,
}

impl Shared {
    fn client(&self) -> Option<Arc<Client>> {
        self.client.read().ok().and_then(|c| c.clone())
    }

    fn set_client(&self, client: Option<Arc<Client>>) {
        if let Ok(mut slot) = self.client.write() {
            *slot = client;
        }
    }

    fn handler(&self) -> Option<EventHandler> {
        self.handler.read().ok().and_then(|h| h.clone())
    }

    async fn on_event(&self, session_id: &str, event: Event, client: Arc<Client>) {
        match &event {
            Event::PairingQrCode { code, .. } => {
                debug!(session = %session_id, "pairing QR code rotated");
                if let Some(tx) = self.qr_tx.lock().await.as_ref() {
                    let _ = tx.send(QrEvent::Code(code.clone())).await;
                }
            }
            Event::PairSuccess(pair) => {
                info!(session = %session_id, "whatsapp pairing successful");
                if let Ok(mut jid) = self.device_jid.write() {
                    *jid = Some(pair.id.to_string());
                }
                if let Some(tx) = self.qr_tx.lock().await.take() {
                    let _ = tx.send(QrEvent::Success).await;
                }
            }
            Event::Connected(_) => {
                info!(session = %session_id, "whatsapp connected");
                self.connected.store(true, Ordering::SeqCst);
                self.set_client(Some(client));
            }
            Event::Disconnected(_) | Event::LoggedOut(_) => {
                warn!(session = %session_id, "whatsapp connection lost");
                self.connected.store(false, Ordering::SeqCst);
            }
            _ => {}
        }
        if let (Some(raw), Some(handler)) = (inbound::translate(&event), self.handler()) {
            handler(raw).await;
        }
    }
}

pub struct WhatsAppClient {
    session_id: String,
    store: Arc<SqlxDeviceStore>,
    device_name: String,
    shared: Arc<Shared>,
    run: Mutex<Option<JoinHandle<()>>>,
}

impl WhatsAppClient {
    fn connected_client(&self) -> Result<Arc<Client>, GatewayError> {
        match self.shared.client() {
            Some(c) if self.shared.connected.load(Ordering::SeqCst) => Ok(c),
            _ => Err(GatewayError::SessionNotConnected(self.session_id.clone())),
        }
    }

    fn jid(raw: &str) -> Result<Jid, GatewayError> {
        stanza::parse_jid(raw)
    }

    /// Own device JID: learned at pairing, or read back from the device record.
    async fn own_jid(&self) -> Result<String, GatewayError> {
        if let Some(jid) = self.device_jid() {
            return Ok(jid);
        }
        self.store
            .paired_jid()
            .await?
            .ok_or_else(|| GatewayError::SessionNotAuthenticated(self.session_id.clone()))
    }

    async fn group_iq(&self, set: bool, to: &str, content: Node) -> Result<Node, GatewayError> {
        let client = self.connected_client()?;
        stanza::send_iq(&client, "w:g2", set, to, content).await
    }

    async fn send_with_retry(
        &self,
        client: &Client,
        jid: &Jid,
        msg: waproto::whatsapp::Message,
    ) -> Result<String, GatewayError> {
        let mut last_err = String::new();
        for (attempt, delay_ms) in SEND_RETRY_MS.iter().enumerate() {
            match client.send_message(jid.clone(), msg.clone()).await {
                Ok(id) => return Ok(id),
                Err(e) => {
                    last_err = e.to_string();
                    if attempt + 1 < SEND_RETRY_MS.len() {
                        warn!(
                            session = %self.session_id,
                            attempt = attempt + 1,
                            "send failed, retrying in {delay_ms}ms: {e}"
                        );
                        tokio::time::sleep(std::time::Duration::from_millis(*delay_ms)).await;
                    }
                }
            }
        }
        Err(GatewayError::Protocol(format!(
            "send failed after {} attempts: {last_err}",
            SEND_RETRY_MS.len()
        )))
    }
}

#[async_trait]
impl ProtocolClient for WhatsAppClient {
    fn device_jid(&self) -> Option<String> {
        self.shared.device_jid.read().ok().and_then(|j| j.clone())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn add_event_handler(&self, handler: EventHandler) {
        if let Ok(mut slot) = self.shared.handler.write() {
            *slot = Some(handler);
        }
    }

    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>, GatewayError> {
        let (tx, rx) = mpsc::channel(4);
        *self.shared.qr_tx.lock().await = Some(tx);
        Ok(rx)
    }

    async fn connect(&self) -> Result<(), GatewayError> {
        let mut run = self.run.lock().await;
        if run.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let session_id = self.session_id.clone();
        let mut bot = Bot::builder()
            .with_backend(Arc::clone(&self.store))
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .with_device_props(
                Some(self.device_name.clone()),
                None,
                Some(waproto::whatsapp::device_props::PlatformType::Desktop),
            )
            .on_event(move |event, client| {
                let shared = Arc::clone(&shared);
                let session_id = session_id.clone();
                async move { shared.on_event(&session_id, event, client).await }
            })
            .build()
            .await
            .map_err(|e| GatewayError::Protocol(format!("whatsapp bot build failed: {e}")))?;

        self.shared.set_client(Some(bot.client()));
        let handle = bot
            .run()
            .await
            .map_err(|e| GatewayError::Protocol(format!("whatsapp bot run failed: {e}")))?;
        *run = Some(handle);
        info!(session = %self.session_id, "whatsapp bot started");
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(client) = self.shared.client() {
            client.disconnect().await;
        }
        if let Some(handle) = self.run.lock().await.take() {
            handle.abort();
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.set_client(None);
    }

    async fn logout(&self) -> Result<(), GatewayError> {
        let own = self.own_jid().await?;
        let client = self.connected_client()?;
        stanza::send_iq(
            &client,
            "md",
            true,
            stanza::SERVER,
            stanza::remove_companion(&own),
        )
        .await?;
        info!(session = %self.session_id, "companion device removed on the server");
        self.disconnect().await;
        self.store.purge().await?;
        if let Ok(mut jid) = self.shared.device_jid.write() {
            *jid = None;
        }
        Ok(())
    }

    async fn delete_device(&self) -> Result<(), GatewayError> {
        self.disconnect().await;
        self.store.purge().await
    }

    async fn pair_phone(&self, _phone: &str) -> Result<String, GatewayError> {
        Err(GatewayError::Unsupported(
            "phone pairing is not supported by the whatsapp-web backend; use the QR flow".into(),
        ))
    }

    async fn send_message(
        &self,
        to: &str,
        content: OutgoingContent,
    ) -> Result<SendReceipt, GatewayError> {
        let client = self.connected_client()?;
        let jid = Self::jid(to)?;
        let msg = outbound::build(to, content)?;
        let id = self.send_with_retry(&client, &jid, msg).await?;
        Ok(SendReceipt {
            id,
            timestamp: chrono::Utc::now().timestamp(),
        })
    }

    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> Result<UploadedMedia, GatewayError> {
        let client = self.connected_client()?;
        let up = client
            .upload(data, outbound::media_type(kind))
            .await
            .map_err(|e| GatewayError::UploadFailed(format!("whatsapp upload: {e}")))?;
        Ok(UploadedMedia {
            url: up.url,
            direct_path: up.direct_path,
            media_key: up.media_key,
            file_enc_sha256: up.file_enc_sha256,
            file_sha256: up.file_sha256,
            file_length: up.file_length,
        })
    }

    async fn download_media(&self, keys: &MediaKeys) -> Result<Vec<u8>, GatewayError> {
        let client = self.connected_client()?;
        let result = match Downloadable::from_keys(keys) {
            Downloadable::Image(m) => client.download(&m).await,
            Downloadable::Video(m) => client.download(&m).await,
            Downloadable::Audio(m) => client.download(&m).await,
            Downloadable::Document(m) => client.download(&m).await,
            Downloadable::Sticker(m) => client.download(&m).await,
        };
        result.map_err(|e| {
            let msg = e.to_string();
            // The CDN answers 404/410 once the sender's copy has aged out.
            if msg.contains("404") || msg.contains("410") {
                GatewayError::MediaExpired(msg)
            } else {
                GatewayError::DownloadFailed(msg)
            }
        })
    }

    async fn request_unavailable_message(
        &self,
        chat: &str,
        sender: &str,
        message_id: &str,
    ) -> Result<(), GatewayError> {
        let client = self.connected_client()?;
        let own = stanza::to_non_ad(&self.own_jid().await?);
        let msg = outbound::unavailable_request(chat, sender, message_id);
        self.send_with_retry(&client, &Self::jid(&own)?, msg).await?;
        debug!(session = %self.session_id, msg_id = %message_id, "re-upload requested from phone");
        Ok(())
    }

    async fn send_presence(&self, available: bool) -> Result<(), GatewayError> {
        let client = self.connected_client()?;
        stanza::send_node(&client, stanza::presence(available, &self.device_name)).await
    }

    async fn send_chat_presence(
        &self,
        chat: &str,
        state: ChatPresenceState,
    ) -> Result<(), GatewayError> {
        let client = self.connected_client()?;
        Self::jid(chat)?;
        stanza::send_node(&client, stanza::chat_state(chat, state)).await
    }

    async fn mark_read(
        &self,
        chat: &str,
        sender: &str,
        message_ids: &[String],
    ) -> Result<(), GatewayError> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let client = self.connected_client()?;
        Self::jid(chat)?;
        let participant = wagate_core::jid::is_group(chat).then_some(sender);
        let receipt = stanza::read_receipt(
            chat,
            participant,
            message_ids,
            chrono::Utc::now().timestamp(),
        );
        stanza::send_node(&client, receipt).await
    }

    async fn archive_chat(&self, _chat: &str, _archive: bool) -> Result<(), GatewayError> {
        Err(GatewayError::Unsupported(
            "archive_chat needs app-state patch encoding, which the whatsapp-web backend \
             does not implement"
                .into(),
        ))
    }

    async fn delete_chat(&self, _chat: &str) -> Result<(), GatewayError> {
        Err(GatewayError::Unsupported(
            "delete_chat needs app-state patch encoding, which the whatsapp-web backend \
             does not implement"
                .into(),
        ))
    }

    async fn group_create(
        &self,
        name: &str,
        participants: &[String],
    ) -> Result<GroupInfo, GatewayError> {
        let key = format!("{:X}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default());
        let resp = self
            .group_iq(
                true,
                stanza::GROUP_SERVER,
                stanza::group_create(name, participants, &key),
            )
            .await?;
        stanza::response_group(&resp)
    }

    async fn group_info(&self, jid: &str) -> Result<GroupInfo, GatewayError> {
        let resp = self.group_iq(false, jid, stanza::group_query()).await?;
        stanza::response_group(&resp)
    }

    async fn group_list(&self) -> Result<Vec<GroupInfo>, GatewayError> {
        let resp = self
            .group_iq(false, stanza::GROUP_SERVER, stanza::group_participating())
            .await?;
        Ok(stanza::response_groups(&resp))
    }

    async fn group_leave(&self, jid: &str) -> Result<(), GatewayError> {
        self.group_iq(true, stanza::GROUP_SERVER, stanza::group_leave(jid))
            .await?;
        Ok(())
    }

    async fn group_set_name(&self, jid: &str, name: &str) -> Result<(), GatewayError> {
        self.group_iq(true, jid, stanza::group_subject(name)).await?;
        Ok(())
    }

    async fn group_set_topic(&self, jid: &str, topic: &str) -> Result<(), GatewayError> {
        let current = self.group_iq(false, jid, stanza::group_query()).await?;
        let prev = stanza::description_id(&current);
        let id = format!("{:X}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default());
        self.group_iq(
            true,
            jid,
            stanza::group_description(topic, &id, prev.as_deref()),
        )
        .await?;
        Ok(())
    }

    async fn group_participants(
        &self,
        jid: &str,
        action: ParticipantAction,
        participants: &[String],
    ) -> Result<(), GatewayError> {
        self.group_iq(true, jid, stanza::group_participants(action, participants))
            .await?;
        Ok(())
    }

    async fn group_invite_link(&self, jid: &str, reset: bool) -> Result<String, GatewayError> {
        let resp = self.group_iq(reset, jid, stanza::group_invite()).await?;
        stanza::response_invite_link(&resp)
    }

    async fn group_join(&self, code: &str) -> Result<String, GatewayError> {
        let resp = self
            .group_iq(true, stanza::GROUP_SERVER, stanza::group_join(code))
            .await?;
        stanza::response_joined_jid(&resp)
    }
}
