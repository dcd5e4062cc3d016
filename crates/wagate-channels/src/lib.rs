//! # wagate-channels
//!
//! Protocol backends for the gateway plus pairing helpers (QR rendering,
//! pairing-code formatting). The WhatsApp Web backend is compiled in with
//! the `whatsapp-web` feature.

pub mod pairing;
pub mod qr;
pub mod unavailable;

#[cfg(feature = "whatsapp-web")]
pub mod device_store;
#[cfg(feature = "whatsapp-web")]
pub mod whatsapp;

pub use pairing::format_pairing_code;
pub use unavailable::UnavailableFactory;

use std::sync::Arc;
use wagate_core::{config::Config, error::GatewayError, traits::ProtocolFactory};

/// The protocol backend this binary was built with.
pub async fn protocol_factory(config: &Config) -> Result<Arc<dyn ProtocolFactory>, GatewayError> {
    #[cfg(feature = "whatsapp-web")]
    {
        let factory =
            whatsapp::WhatsAppFactory::open(&config.gateway.data_dir, &config.gateway.name).await?;
        Ok(Arc::new(factory))
    }
    #[cfg(not(feature = "whatsapp-web"))]
    {
        let _ = config;
        tracing::warn!("built without the whatsapp-web feature; sessions cannot connect");
        Ok(Arc::new(UnavailableFactory))
    }
}
