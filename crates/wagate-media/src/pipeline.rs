//! Media download & storage pipeline.
//!
//! Media rows are written by the dispatcher with `downloaded = false`. The
//! pipeline pulls the encrypted blob through the protocol client, uploads the
//! plaintext to the object store, and records the outcome. Downloads for one
//! session share a counting semaphore so the protocol network is not hammered.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wagate_core::{
    config::{MediaConfig, MAX_MEDIA_BATCH},
    error::GatewayError,
    protocol::{MediaKeys, MediaKind},
    records::{Direction, MediaRecord},
    traits::{ObjectStore, ProtocolClient},
};
use wagate_store::Store;

use crate::keys::{base_mime, extension_for, object_key};

/// Pause between items of one batch.
const ITEM_THROTTLE: Duration = Duration::from_millis(100);

/// Deadline for a single on-demand retry.
const RETRY_DEADLINE: Duration = Duration::from_secs(120);

/// Result of one download batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub stored: usize,
    pub failed: usize,
}

/// An outbound media message whose bytes should be kept.
#[derive(Debug, Clone)]
pub struct SentMedia {
    pub session_id: String,
    pub msg_id: String,
    pub chat_jid: String,
    pub sender_jid: String,
    pub kind: MediaKind,
    pub mime_type: String,
    pub file_name: Option<String>,
    pub data: Vec<u8>,
}

pub struct MediaPipeline {
    store: Store,
    objects: Arc<dyn ObjectStore>,
    config: MediaConfig,
    presign_ttl: Duration,
    limits: Mutex<HashMap<String, Arc<Semaphore>>>,
    tracker: TaskTracker,
}

impl MediaPipeline {
    pub fn new(
        store: Store,
        objects: Arc<dyn ObjectStore>,
        config: MediaConfig,
        presign_ttl: Duration,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            store,
            objects,
            config,
            presign_ttl,
            limits: Mutex::new(HashMap::new()),
            tracker,
        }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    fn semaphore(&self, session_id: &str) -> Arc<Semaphore> {
        let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
        limits
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_parallel_per_session.max(1))))
            .clone()
    }

    /// Drop per-session state once a session is deleted.
    pub fn forget_session(&self, session_id: &str) {
        let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sem) = limits.remove(session_id) {
            sem.close();
        }
    }

    /// Download, store, and record one media row.
    ///
    /// Failures bump the attempt counter. An expired blob also triggers a
    /// re-upload request to the sender's device.
    pub async fn download_one(
        &self,
        client: &dyn ProtocolClient,
        media: &MediaRecord,
    ) -> Result<MediaRecord, GatewayError> {
        if !media.has_keys() {
            return Err(GatewayError::MediaMissingKeys(media.msg_id.clone()));
        }
        let _permit = self
            .semaphore(&media.session_id)
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::Internal("session media limiter closed".into()))?;

        match self.fetch_and_store(client, media).await {
            Ok((key, url)) => {
                self.store.mark_media_stored(&media.id, &key, &url).await?;
                info!(
                    session = %media.session_id,
                    msg_id = %media.msg_id,
                    key = %key,
                    "media stored"
                );
                let mut stored = media.clone();
                stored.downloaded = true;
                stored.storage_key = Some(key);
                stored.storage_url = Some(url);
                stored.stored_at = Some(Utc::now());
                stored.download_error = None;
                Ok(stored)
            }
            Err(e) => {
                warn!(
                    session = %media.session_id,
                    msg_id = %media.msg_id,
                    attempt = media.download_attempts + 1,
                    "media download failed: {e}"
                );
                if let Err(db) = self.store.mark_media_failed(&media.id, &e.to_string()).await {
                    warn!(msg_id = %media.msg_id, "could not record media failure: {db}");
                }
                if e.is_media_expired() {
                    match client
                        .request_unavailable_message(&media.chat_jid, &media.sender_jid, &media.msg_id)
                        .await
                    {
                        Ok(()) => info!(msg_id = %media.msg_id, "requested media re-upload from sender"),
                        Err(re) => warn!(msg_id = %media.msg_id, "re-upload request failed: {re}"),
                    }
                }
                Err(e)
            }
        }
    }

    async fn fetch_and_store(
        &self,
        client: &dyn ProtocolClient,
        media: &MediaRecord,
    ) -> Result<(String, String), GatewayError> {
        let kind = MediaKind::parse(&media.media_type).unwrap_or(MediaKind::Document);
        let keys = MediaKeys {
            kind,
            direct_path: media.wa_direct_path.clone(),
            media_key: media.wa_media_key.clone(),
            file_sha256: media.wa_file_sha256.clone(),
            file_enc_sha256: media.wa_file_enc_sha256.clone(),
            file_length: u64::try_from(media.file_size).unwrap_or_default(),
            mimetype: media.mime_type.clone(),
        };
        let data = client.download_media(&keys).await?;

        let mime = if media.mime_type.is_empty() {
            kind.default_mime().to_string()
        } else {
            base_mime(&media.mime_type)
        };
        let key = object_key(
            &media.session_id,
            media.direction,
            media.created_at,
            &media.msg_id,
            &media.media_type,
            &extension_for(&mime, media.file_name.as_deref()),
        );
        let stored = self.objects.upload(&key, data, &mime).await?;
        Ok((stored.key, stored.url))
    }

    /// Work through up to `batch_size` pending rows of one session, oldest first.
    pub async fn run_batch(
        &self,
        client: &dyn ProtocolClient,
        session_id: &str,
        batch_size: u32,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, GatewayError> {
        let limit = batch_size.clamp(1, MAX_MEDIA_BATCH);
        let pending = self
            .store
            .pending_media(session_id, self.config.max_attempts, limit)
            .await?;
        let mut outcome = BatchOutcome::default();
        if pending.is_empty() {
            return Ok(outcome);
        }
        debug!(session = %session_id, count = pending.len(), "media batch started");

        for (i, media) in pending.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if i > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ITEM_THROTTLE) => {}
                }
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.download_one(client, media) => r,
            };
            match result {
                Ok(_) => outcome.stored += 1,
                Err(_) => outcome.failed += 1,
            }
        }
        info!(
            session = %session_id,
            stored = outcome.stored,
            failed = outcome.failed,
            "media batch finished"
        );
        Ok(outcome)
    }

    /// Schedule an on-demand download of one message's media.
    ///
    /// Returns once the row is validated; the download itself runs detached
    /// and ignores the automatic attempt cap.
    pub async fn spawn_retry(
        self: &Arc<Self>,
        client: Arc<dyn ProtocolClient>,
        session_id: &str,
        msg_id: &str,
        cancel: CancellationToken,
    ) -> Result<MediaRecord, GatewayError> {
        let media = self
            .store
            .get_media(session_id, msg_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("media for message {msg_id}")))?;
        if !media.has_keys() {
            return Err(GatewayError::MediaMissingKeys(msg_id.to_string()));
        }

        let pipeline = Arc::clone(self);
        let row = media.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(msg_id = %row.msg_id, "media retry cancelled");
                }
                r = tokio::time::timeout(RETRY_DEADLINE, pipeline.download_one(client.as_ref(), &row)) => {
                    if r.is_err() {
                        warn!(msg_id = %row.msg_id, "media retry timed out");
                    }
                }
            }
        });
        Ok(media)
    }

    /// Keep the bytes of a media message we just sent.
    pub async fn capture_sent(&self, sent: SentMedia) -> Result<MediaRecord, GatewayError> {
        let now = Utc::now();
        let mime = if sent.mime_type.is_empty() {
            sent.kind.default_mime().to_string()
        } else {
            base_mime(&sent.mime_type)
        };
        let key = object_key(
            &sent.session_id,
            Direction::Sent,
            now,
            &sent.msg_id,
            sent.kind.as_str(),
            &extension_for(&mime, sent.file_name.as_deref()),
        );
        let size = sent.data.len() as i64;
        let stored = self.objects.upload(&key, sent.data, &mime).await?;

        let record = MediaRecord {
            id: Uuid::new_v4().to_string(),
            session_id: sent.session_id,
            msg_id: sent.msg_id,
            chat_jid: sent.chat_jid,
            sender_jid: sent.sender_jid,
            direction: Direction::Sent,
            media_type: sent.kind.as_str().to_string(),
            mime_type: mime,
            file_size: size,
            file_name: sent.file_name,
            wa_direct_path: String::new(),
            wa_media_key: Vec::new(),
            wa_file_sha256: Vec::new(),
            wa_file_enc_sha256: Vec::new(),
            wa_media_key_timestamp: 0,
            width: None,
            height: None,
            storage_key: Some(stored.key.clone()),
            storage_url: Some(stored.url.clone()),
            stored_at: Some(now),
            downloaded: true,
            download_error: None,
            download_attempts: 0,
            created_at: now,
        };
        self.store.upsert_media(&record).await?;
        debug!(session = %record.session_id, msg_id = %record.msg_id, key = %stored.key, "sent media captured");
        Ok(record)
    }

    /// Media row for a message plus a presigned URL when it is stored.
    pub async fn media_info(
        &self,
        session_id: &str,
        msg_id: &str,
    ) -> Result<(MediaRecord, Option<String>), GatewayError> {
        let media = self
            .store
            .get_media(session_id, msg_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("media for message {msg_id}")))?;
        let presigned = match (&media.storage_key, media.downloaded) {
            (Some(key), true) => match self.objects.presign(key, self.presign_ttl).await {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(msg_id, "presign failed: {e}");
                    None
                }
            },
            _ => None,
        };
        Ok((media, presigned))
    }
}

#[cfg(test)]
mod tests;
