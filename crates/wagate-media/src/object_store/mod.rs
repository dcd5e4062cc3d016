//! Object store adapters.

mod memory;
mod s3;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use wagate_core::{config::StorageConfig, error::GatewayError, traits::ObjectStore};

/// Build the configured object store.
pub async fn build_object_store(
    config: &StorageConfig,
) -> Result<Arc<dyn ObjectStore>, GatewayError> {
    match config.backend.as_str() {
        "s3" => Ok(Arc::new(S3ObjectStore::from_config(config).await?)),
        "memory" => Ok(Arc::new(MemoryObjectStore::new(&config.bucket))),
        other => Err(GatewayError::Config(format!(
            "unsupported storage backend: {other}"
        ))),
    }
}

/// Create the bucket, retrying with exponential backoff (`base`, `2*base`, `4*base`, ...).
pub async fn ensure_bucket_with_backoff(
    store: &dyn ObjectStore,
    attempts: u32,
    base: Duration,
) -> Result<(), GatewayError> {
    let mut delay = base;
    let mut last_err = None;
    for attempt in 1..=attempts.max(1) {
        match store.ensure_bucket().await {
            Ok(()) => {
                info!(backend = store.name(), "object store bucket ready");
                return Ok(());
            }
            Err(e) => {
                warn!(
                    backend = store.name(),
                    attempt, "bucket setup failed: {e}"
                );
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
    Err(GatewayError::StorageUnavailable(format!(
        "bucket setup failed after {attempts} attempts: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}
