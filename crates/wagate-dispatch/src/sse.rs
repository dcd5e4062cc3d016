//! In-process pub/sub for live event subscribers.
//!
//! One task owns structural changes: register, unregister, and broadcast all
//! travel over a command channel and are applied in order. Broadcast uses a
//! non-blocking put per client; a full client buffer drops that event for
//! that client only.

use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wagate_core::{config::SseConfig, event::Envelope};

const COMMAND_CAPACITY: usize = 4096;

type ClientMap = HashMap<String, HashMap<u64, mpsc::Sender<Arc<str>>>>;

enum HubCommand {
    Register {
        session_id: String,
        client_id: u64,
        tx: mpsc::Sender<Arc<str>>,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        session_id: String,
        client_id: u64,
    },
    Broadcast {
        session_id: String,
        payload: Arc<str>,
    },
    CloseSession {
        session_id: String,
    },
}

pub struct SseHub {
    commands: mpsc::Sender<HubCommand>,
    clients: Arc<RwLock<ClientMap>>,
    next_id: AtomicU64,
    buffer: usize,
    dropped: Arc<AtomicU64>,
}

impl SseHub {
    /// Start the hub task; it stops when `cancel` fires.
    pub fn spawn(config: &SseConfig, cancel: CancellationToken) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let clients = Arc::new(RwLock::new(ClientMap::new()));
        let dropped = Arc::new(AtomicU64::new(0));
        tokio::spawn(run_hub(rx, Arc::clone(&clients), Arc::clone(&dropped), cancel));
        Arc::new(Self {
            commands: tx,
            clients,
            next_id: AtomicU64::new(1),
            buffer: config.client_buffer.max(1),
            dropped,
        })
    }

    /// Add a subscriber for one session. Events published after this returns
    /// are delivered to it.
    pub async fn register(&self, session_id: &str) -> Option<SseSubscription> {
        let client_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        let (ack, acked) = oneshot::channel();
        self.commands
            .send(HubCommand::Register {
                session_id: session_id.to_string(),
                client_id,
                tx,
                ack,
            })
            .await
            .ok()?;
        acked.await.ok()?;
        Some(SseSubscription {
            session_id: session_id.to_string(),
            client_id,
            rx,
            commands: self.commands.clone(),
        })
    }

    /// Serialize once and hand the payload to the hub. Never waits.
    pub fn publish(&self, envelope: &Envelope) {
        let payload: Arc<str> = match serde_json::to_string(envelope) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(event = %envelope.event, "could not encode envelope for sse: {e}");
                return;
            }
        };
        if self.client_count(&envelope.session_id) == 0 {
            return;
        }
        let cmd = HubCommand::Broadcast {
            session_id: envelope.session_id.clone(),
            payload,
        };
        if self.commands.try_send(cmd).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(session = %envelope.session_id, "sse hub saturated, event dropped");
        }
    }

    pub fn client_count(&self, session_id: &str) -> usize {
        self.clients
            .read()
            .map(|m| m.get(session_id).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    pub fn total_clients(&self) -> usize {
        self.clients
            .read()
            .map(|m| m.values().map(HashMap::len).sum())
            .unwrap_or(0)
    }

    /// Events dropped because a client (or the hub) was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// End every subscriber stream of a session.
    pub fn close_session(&self, session_id: &str) {
        let _ = self.commands.try_send(HubCommand::CloseSession {
            session_id: session_id.to_string(),
        });
    }
}

async fn run_hub(
    mut rx: mpsc::Receiver<HubCommand>,
    clients: Arc<RwLock<ClientMap>>,
    dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    loop {
        let cmd = tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };
        match cmd {
            HubCommand::Register {
                session_id,
                client_id,
                tx,
                ack,
            } => {
                if let Ok(mut map) = clients.write() {
                    map.entry(session_id.clone()).or_default().insert(client_id, tx);
                }
                debug!(session = %session_id, client = client_id, "sse client registered");
                let _ = ack.send(());
            }
            HubCommand::Unregister {
                session_id,
                client_id,
            } => {
                if let Ok(mut map) = clients.write() {
                    if let Some(set) = map.get_mut(&session_id) {
                        set.remove(&client_id);
                        if set.is_empty() {
                            map.remove(&session_id);
                        }
                    }
                }
                debug!(session = %session_id, client = client_id, "sse client unregistered");
            }
            HubCommand::Broadcast {
                session_id,
                payload,
            } => {
                let mut closed = Vec::new();
                if let Ok(map) = clients.read() {
                    if let Some(set) = map.get(&session_id) {
                        for (id, tx) in set {
                            match tx.try_send(Arc::clone(&payload)) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    dropped.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                            }
                        }
                    }
                }
                if !closed.is_empty() {
                    if let Ok(mut map) = clients.write() {
                        if let Some(set) = map.get_mut(&session_id) {
                            for id in closed {
                                set.remove(&id);
                            }
                        }
                    }
                }
            }
            HubCommand::CloseSession { session_id } => {
                if let Ok(mut map) = clients.write() {
                    map.remove(&session_id);
                }
            }
        }
    }
    if let Ok(mut map) = clients.write() {
        map.clear();
    }
    debug!("sse hub stopped");
}

/// A registered subscriber. Dropping it unregisters.
pub struct SseSubscription {
    session_id: String,
    client_id: u64,
    rx: mpsc::Receiver<Arc<str>>,
    commands: mpsc::Sender<HubCommand>,
}

impl SseSubscription {
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.rx.try_recv().ok()
    }
}

impl Stream for SseSubscription {
    type Item = Arc<str>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for SseSubscription {
    fn drop(&mut self) {
        let _ = self.commands.try_send(HubCommand::Unregister {
            session_id: std::mem::take(&mut self.session_id),
            client_id: self.client_id,
        });
    }
}
