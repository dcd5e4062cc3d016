//! Gateway: builds every component from config, runs the HTTP API, and tears
//! it all down in order on shutdown.

use crate::api::{self, ApiState};
use crate::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};
use wagate_channels::protocol_factory;
use wagate_core::{config::Config, error::GatewayError};
use wagate_dispatch::{Dispatcher, SseHub, WebhookSender};
use wagate_media::{build_object_store, ensure_bucket_with_backoff, MediaPipeline};
use wagate_store::Store;

const BUCKET_ATTEMPTS: u32 = 5;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The running gateway.
pub struct Gateway {
    config: Config,
    registry: Arc<Registry>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Gateway {
    /// Open the store and object storage, start the event hub, and restore
    /// persisted sessions.
    pub async fn new(config: Config, shutdown: CancellationToken) -> Result<Self, GatewayError> {
        let tracker = TaskTracker::new();

        let store = Store::new(&config).await?;
        info!(url = %config.database.url, "store ready");

        let objects = build_object_store(&config.storage).await?;
        ensure_bucket_with_backoff(&*objects, BUCKET_ATTEMPTS, Duration::from_secs(1)).await?;

        let webhooks = WebhookSender::new(&config.webhook, store.clone(), tracker.clone())?;
        let hub = SseHub::spawn(&config.sse, shutdown.clone());
        let media_ready = Arc::new(Notify::new());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            webhooks,
            hub,
            media_ready.clone(),
        ));
        let media = Arc::new(MediaPipeline::new(
            store.clone(),
            objects,
            config.media.clone(),
            Duration::from_secs(config.storage.presign_ttl_secs),
            tracker.clone(),
        ));

        let factory = protocol_factory(&config).await?;
        info!(backend = factory.name(), "protocol backend selected");

        let registry = Registry::new(
            store,
            factory,
            dispatcher,
            media,
            config.dispatch.mailbox_capacity,
            tracker.clone(),
            shutdown.clone(),
        );
        registry.restore().await?;
        registry.spawn_media_scanner(media_ready);

        Ok(Self {
            config,
            registry,
            tracker,
            shutdown,
        })
    }

    /// Serve the API until the shutdown token fires, then drain background work.
    pub async fn run(self) -> Result<(), GatewayError> {
        info!(
            "{} gateway running | api: {}:{} | storage: {} | auth: {}",
            self.config.gateway.name,
            self.config.api.host,
            self.config.api.port,
            self.config.storage.backend,
            if self.config.api.api_key.is_empty() {
                "disabled"
            } else {
                "enforced"
            },
        );

        let state = ApiState::new(self.registry.clone(), &self.config)?;
        let served = api::serve(&self.config, state, self.shutdown.clone()).await;
        if let Err(e) = &served {
            error!("API server failed: {e}");
        }

        self.stop().await;
        served
    }

    async fn stop(&self) {
        info!("shutting down");
        self.shutdown.cancel();
        self.registry.shutdown().await;

        self.tracker.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                pending = self.tracker.len(),
                "background tasks still running after {}s, exiting anyway",
                DRAIN_TIMEOUT.as_secs()
            );
        }
        info!("shutdown complete");
    }
}
