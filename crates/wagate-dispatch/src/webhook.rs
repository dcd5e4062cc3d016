//! Webhook delivery: per-webhook filtering, HMAC signing, bounded-concurrency POSTs.
//!
//! Every matching webhook gets one detached POST per event. The target URL is
//! re-validated before each POST and redirects are never followed. Failures
//! are logged and counted; they never reach the dispatcher. There are no retries.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use wagate_core::{
    config::WebhookConfig,
    error::GatewayError,
    event::{filter_matches, Envelope},
    records::WebhookRecord,
};
use wagate_store::Store;

use crate::url_policy::validate_webhook_url;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// `sha256=<hex(HMAC_SHA256(secret, body))>`
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Delivery counters, shared with the health endpoint.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliverySnapshot {
    pub delivered: u64,
    pub failed: u64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, ok: bool) {
        if ok {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Clone)]
pub struct WebhookSender {
    http: reqwest::Client,
    store: Store,
    limiter: Arc<Semaphore>,
    tracker: TaskTracker,
    stats: Arc<DeliveryStats>,
    user_agent: String,
    allow_loopback: bool,
}

impl WebhookSender {
    pub fn new(
        config: &WebhookConfig,
        store: Store,
        tracker: TaskTracker,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Internal(format!("webhook http client: {e}")))?;
        Ok(Self {
            http,
            store,
            limiter: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            tracker,
            stats: Arc::new(DeliveryStats::default()),
            user_agent: config.user_agent.clone(),
            allow_loopback: config.allow_loopback,
        })
    }

    pub fn stats(&self) -> &Arc<DeliveryStats> {
        &self.stats
    }

    /// Fan an envelope out to the session's enabled, subscribed webhooks.
    ///
    /// Returns how many deliveries were launched. The POSTs run detached and
    /// are aborted when `cancel` fires.
    pub async fn send(
        &self,
        envelope: &Envelope,
        cancel: &CancellationToken,
    ) -> Result<usize, GatewayError> {
        let hooks = self.store.enabled_webhooks(&envelope.session_id).await?;
        Ok(self.send_to(&hooks, envelope, cancel))
    }

    /// Launch deliveries to the matching subset of `hooks`.
    pub fn send_to(
        &self,
        hooks: &[WebhookRecord],
        envelope: &Envelope,
        cancel: &CancellationToken,
    ) -> usize {
        let targets: Vec<&WebhookRecord> = hooks
            .iter()
            .filter(|h| h.enabled && filter_matches(&h.events, &envelope.event))
            .collect();
        if targets.is_empty() {
            return 0;
        }
        let body = match serde_json::to_vec(envelope) {
            Ok(b) => Arc::new(b),
            Err(e) => {
                warn!(event = %envelope.event, "could not encode envelope: {e}");
                return 0;
            }
        };

        for hook in &targets {
            let sender = self.clone();
            let body = Arc::clone(&body);
            let url = hook.url.clone();
            let webhook_id = hook.id.clone();
            let secret = hook.secret.clone().filter(|s| !s.is_empty());
            let event = envelope.event.clone();
            let cancel = cancel.clone();
            self.tracker.spawn(async move {
                let Ok(_permit) = sender.limiter.clone().acquire_owned().await else {
                    return;
                };
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(webhook = %webhook_id, event = %event, "webhook delivery cancelled");
                    }
                    result = sender.post(&url, secret.as_deref(), &body) => {
                        match result {
                            Ok(status) if (200..300).contains(&status) => {
                                sender.stats.record(true);
                                debug!(webhook = %webhook_id, event = %event, status, "webhook delivered");
                            }
                            Ok(status) => {
                                sender.stats.record(false);
                                warn!(webhook = %webhook_id, event = %event, status, "webhook rejected delivery");
                            }
                            Err(e) => {
                                sender.stats.record(false);
                                warn!(webhook = %webhook_id, event = %event, "webhook delivery failed: {e}");
                            }
                        }
                    }
                }
            });
        }
        targets.len()
    }

    /// Deliver one envelope synchronously, returning the HTTP status.
    pub async fn send_test(
        &self,
        hook: &WebhookRecord,
        envelope: &Envelope,
    ) -> Result<u16, GatewayError> {
        let body = serde_json::to_vec(envelope)?;
        let status = self
            .post(&hook.url, hook.secret.as_deref().filter(|s| !s.is_empty()), &body)
            .await;
        self.stats
            .record(matches!(status, Ok(s) if (200..300).contains(&s)));
        status
    }

    async fn post(&self, url: &str, secret: Option<&str>, body: &[u8]) -> Result<u16, GatewayError> {
        let url = validate_webhook_url(url, self.allow_loopback).await?;
        let mut req = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .body(body.to_vec());
        if let Some(secret) = secret {
            req = req.header(SIGNATURE_HEADER, sign(secret, body));
        }
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::ProtocolTimeout(format!("webhook {url} timed out"))
            } else {
                GatewayError::WebhookDelivery(format!("{url}: {e}"))
            }
        })?;
        Ok(resp.status().as_u16())
    }
}
