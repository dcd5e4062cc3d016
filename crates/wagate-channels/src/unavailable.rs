//! Factory used when the binary is built without a protocol backend.
//!
//! Sessions can still be created, listed, and deleted, and their webhooks
//! managed; connecting fails with a `Protocol` error.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use wagate_core::{
    error::GatewayError,
    protocol::{MediaKeys, MediaKind, OutgoingContent, QrEvent, SendReceipt, UploadedMedia},
    traits::{EventHandler, ProtocolClient, ProtocolFactory},
};

fn missing() -> GatewayError {
    GatewayError::Protocol(
        "no WhatsApp protocol backend compiled in; rebuild with --features whatsapp-web".into(),
    )
}

#[derive(Debug, Default)]
pub struct UnavailableFactory;

#[async_trait]
impl ProtocolFactory for UnavailableFactory {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn provision(&self, _session_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn build(&self, _session_id: &str) -> Result<Arc<dyn ProtocolClient>, GatewayError> {
        Ok(Arc::new(UnavailableClient))
    }
}

struct UnavailableClient;

#[async_trait]
impl ProtocolClient for UnavailableClient {
    fn device_jid(&self) -> Option<String> {
        None
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn add_event_handler(&self, _handler: EventHandler) {}

    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>, GatewayError> {
        Err(missing())
    }

    async fn connect(&self) -> Result<(), GatewayError> {
        Err(missing())
    }

    async fn disconnect(&self) {}

    async fn logout(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn delete_device(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn pair_phone(&self, _phone: &str) -> Result<String, GatewayError> {
        Err(missing())
    }

    async fn send_message(
        &self,
        _to: &str,
        _content: OutgoingContent,
    ) -> Result<SendReceipt, GatewayError> {
        Err(missing())
    }

    async fn upload(&self, _data: Vec<u8>, _kind: MediaKind) -> Result<UploadedMedia, GatewayError> {
        Err(missing())
    }

    async fn download_media(&self, _keys: &MediaKeys) -> Result<Vec<u8>, GatewayError> {
        Err(missing())
    }
}
