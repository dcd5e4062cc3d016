//! Background media scanner: picks up pending downloads on a timer and
//! whenever the dispatcher records new media.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info};
use wagate_media::BatchOutcome;

use super::Registry;

impl Registry {
    /// One pass over every connected session with pending media.
    pub async fn scan_media(&self) -> BatchOutcome {
        let config = self.media.config();
        let pending = match self
            .store
            .sessions_with_pending_media(config.max_attempts)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                error!("pending media lookup failed: {e}");
                return BatchOutcome::default();
            }
        };

        let batches = pending.iter().filter_map(|id| {
            let handle = self.lookup_id(id)?;
            let client = handle.connected_client().ok()?;
            let media = Arc::clone(&self.media);
            let batch_size = config.batch_size;
            Some(async move {
                let result = media
                    .run_batch(client.as_ref(), &handle.id, batch_size, &handle.context().cancel)
                    .await;
                match result {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(session = %handle.name, "media batch failed: {e}");
                        BatchOutcome::default()
                    }
                }
            })
        });

        join_all(batches)
            .await
            .into_iter()
            .fold(BatchOutcome::default(), |acc, o| BatchOutcome {
                stored: acc.stored + o.stored,
                failed: acc.failed + o.failed,
            })
    }

    /// Run [`Registry::scan_media`] every `scan_interval_secs` and on `ready`.
    pub fn spawn_media_scanner(self: &Arc<Self>, ready: Arc<Notify>) {
        let config = self.media.config();
        if !config.auto_download {
            info!("automatic media download disabled");
            return;
        }
        let period = Duration::from_secs(config.scan_interval_secs.max(1));
        let registry = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {}
                    _ = ready.notified() => {}
                }
                let outcome = registry.scan_media().await;
                if outcome.stored + outcome.failed > 0 {
                    debug!(stored = outcome.stored, failed = outcome.failed, "media scan done");
                }
            }
            debug!("media scanner stopped");
        });
    }
}
