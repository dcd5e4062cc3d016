//! Session registry and lifecycle controller.
//!
//! Owns one [`SessionHandle`] per named session: its protocol client, its
//! event mailbox, and the mutable status fields. The map lock is never held
//! across an await; lifecycle operations on one session are serialized by a
//! per-session async lock so connect/logout/delete cannot interleave.

mod scanner;
mod session;

#[cfg(test)]
mod tests;

pub use session::{Session, SessionHandle};

use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use wagate_channels::format_pairing_code;
use wagate_core::{
    error::GatewayError,
    event::EventKind,
    jid::normalize_phone,
    protocol::QrEvent,
    records::{SessionRecord, SessionStatus},
    traits::ProtocolFactory,
};
use wagate_dispatch::{Dispatcher, Mailbox, SessionContext, SessionSignal, SignalHandler};
use wagate_media::MediaPipeline;
use wagate_store::Store;

use session::SessionState;

const MAX_NAME_LEN: usize = 64;

/// Result of [`Registry::connect`].
#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    pub session: Session,
    /// A QR pairing flow was started; codes show up on the session as they rotate.
    pub awaiting_qr: bool,
}

/// Session names end up in URL paths and object keys.
fn validate_name(name: &str) -> Result<(), GatewayError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(GatewayError::InvalidRequest(format!(
            "session name must be 1-{MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(GatewayError::InvalidRequest(format!(
            "session name '{name}' may only contain letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}

pub struct Registry {
    store: Store,
    factory: Arc<dyn ProtocolFactory>,
    dispatcher: Arc<Dispatcher>,
    media: Arc<MediaPipeline>,
    mailbox_capacity: usize,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    me: Weak<Registry>,
}

impl Registry {
    pub fn new(
        store: Store,
        factory: Arc<dyn ProtocolFactory>,
        dispatcher: Arc<Dispatcher>,
        media: Arc<MediaPipeline>,
        mailbox_capacity: usize,
        tracker: TaskTracker,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            store,
            factory,
            dispatcher,
            media,
            mailbox_capacity,
            tracker,
            shutdown,
            sessions: RwLock::new(HashMap::new()),
            me: me.clone(),
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn media(&self) -> &Arc<MediaPipeline> {
        &self.media
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn backend(&self) -> &str {
        self.factory.name()
    }

    fn lookup(&self, name: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .read()
            .ok()
            .and_then(|m| m.get(name).cloned())
    }

    fn lookup_id(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .read()
            .ok()
            .and_then(|m| m.values().find(|h| h.id == id).cloned())
    }

    fn all(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Live handle of a session.
    pub fn handle(&self, name: &str) -> Result<Arc<SessionHandle>, GatewayError> {
        self.lookup(name)
            .ok_or_else(|| GatewayError::SessionNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<Session, GatewayError> {
        Ok(self.handle(name)?.snapshot())
    }

    /// Snapshots of every session, ordered by name.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.all().iter().map(|h| h.snapshot()).collect();
        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        sessions
    }

    #[cfg(test)]
    pub fn names(&self) -> Vec<String> {
        self.list().into_iter().map(|s| s.name).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn connected_count(&self) -> usize {
        self.all()
            .iter()
            .filter(|h| h.status() == SessionStatus::Connected)
            .count()
    }

    /// Build the in-memory side of a persisted session: client, context, mailbox.
    async fn attach(&self, record: &SessionRecord) -> Result<Arc<SessionHandle>, GatewayError> {
        let client = self.factory.build(&record.id).await?;
        let ctx = SessionContext {
            id: record.id.clone(),
            name: record.name.clone(),
            cancel: self.shutdown.child_token(),
        };

        // Signals look the session up by name on every event so the mailbox
        // never owns the handle it reports to.
        let registry = self.me.clone();
        let name = record.name.clone();
        let on_signal: SignalHandler = Arc::new(move |signal| {
            let registry = registry.clone();
            let name = name.clone();
            Box::pin(async move {
                if let Some(registry) = registry.upgrade() {
                    registry.apply_signal(&name, signal).await;
                }
            })
        });

        let mailbox = Mailbox::spawn(
            Arc::clone(&self.dispatcher),
            ctx.clone(),
            self.mailbox_capacity,
            &self.tracker,
            on_signal,
        );
        client.add_event_handler(mailbox.handler());

        Ok(Arc::new(SessionHandle::new(
            record,
            client,
            ctx,
            mailbox,
            SessionState::from_record(record),
        )))
    }

    fn insert(&self, handle: Arc<SessionHandle>) -> Result<(), GatewayError> {
        let mut map = self
            .sessions
            .write()
            .map_err(|_| GatewayError::Internal("session map poisoned".into()))?;
        if map.contains_key(&handle.name) {
            return Err(GatewayError::SessionAlreadyExists(handle.name.clone()));
        }
        map.insert(handle.name.clone(), handle);
        Ok(())
    }

    /// Register a new session with a freshly provisioned device record.
    pub async fn create(&self, name: &str) -> Result<Session, GatewayError> {
        validate_name(name)?;
        if self.lookup(name).is_some() {
            return Err(GatewayError::SessionAlreadyExists(name.to_string()));
        }

        let record = self.store.create_session(name).await?;
        let attached = match self.factory.provision(&record.id).await {
            Ok(()) => self.attach(&record).await,
            Err(e) => Err(e),
        };
        let handle = match attached.and_then(|h| self.insert(Arc::clone(&h)).map(|_| h)) {
            Ok(h) => h,
            Err(e) => {
                if let Err(cleanup) = self.store.delete_session(&record.id).await {
                    error!(session = %name, "rollback of failed create failed: {cleanup}");
                }
                return Err(e);
            }
        };

        info!(session = %name, id = %record.id, backend = self.factory.name(), "session created");
        Ok(handle.snapshot())
    }

    /// Disconnect, drop the device credentials, and forget the session.
    ///
    /// When the device delete fails the session stays registered so the
    /// caller can retry.
    pub async fn delete(&self, name: &str) -> Result<(), GatewayError> {
        let handle = self.handle(name)?;
        let _lifecycle = handle.lock_lifecycle().await;

        if handle.client().is_connected() {
            handle.client().disconnect().await;
        }
        handle.client().delete_device().await?;
        self.store.delete_session(&handle.id).await?;

        handle.context().cancel.cancel();
        self.dispatcher.hub().close_session(&handle.id);
        self.media.forget_session(&handle.id);
        if let Ok(mut map) = self.sessions.write() {
            map.remove(name);
        }
        info!(session = %name, id = %handle.id, "session deleted");
        Ok(())
    }

    /// Start connecting. Unpaired devices get a QR flow; paired ones reconnect.
    pub async fn connect(&self, name: &str) -> Result<ConnectOutcome, GatewayError> {
        let handle = self.handle(name)?;
        let _lifecycle = handle.lock_lifecycle().await;
        self.connect_locked(&handle).await
    }

    async fn connect_locked(
        &self,
        handle: &Arc<SessionHandle>,
    ) -> Result<ConnectOutcome, GatewayError> {
        if handle.client().is_connected() {
            return Ok(ConnectOutcome {
                session: handle.snapshot(),
                awaiting_qr: false,
            });
        }

        self.set_status(handle, SessionStatus::Connecting).await;
        let authenticated = handle.is_authenticated();

        let result = if authenticated {
            handle.client().connect().await
        } else {
            // The QR channel must exist before the client starts emitting codes.
            match handle.client().qr_channel().await {
                Ok(rx) => {
                    self.spawn_qr_watch(Arc::clone(handle), rx);
                    handle.client().connect().await
                }
                Err(e) => Err(e),
            }
        };

        if let Err(e) = result {
            warn!(session = %handle.name, "connect failed: {e}");
            self.set_status(handle, SessionStatus::Disconnected).await;
            self.dispatcher
                .emit(
                    handle.context(),
                    EventKind::SessionConnectFailure,
                    json!({ "reason": e.to_string() }),
                )
                .await;
            return Err(e);
        }

        info!(session = %handle.name, authenticated, "session connecting");
        Ok(ConnectOutcome {
            session: handle.snapshot(),
            awaiting_qr: !authenticated,
        })
    }

    /// Invalidate the credentials and return to `disconnected`.
    pub async fn logout(&self, name: &str) -> Result<Session, GatewayError> {
        let handle = self.handle(name)?;
        let _lifecycle = handle.lock_lifecycle().await;

        handle.client().logout().await?;
        handle.update(|s| {
            s.set_status(SessionStatus::Disconnected);
            s.device_jid = None;
        });
        self.persist_status(&handle, SessionStatus::Disconnected).await;
        if let Err(e) = self.store.set_session_device(&handle.id, None).await {
            error!(session = %name, "clearing device after logout failed: {e}");
        }
        self.dispatcher
            .emit(
                handle.context(),
                EventKind::SessionLoggedOut,
                json!({ "reason": "logout requested" }),
            )
            .await;
        info!(session = %name, "session logged out");
        Ok(handle.snapshot())
    }

    /// Disconnect and connect again on the same device.
    pub async fn restart(&self, name: &str) -> Result<ConnectOutcome, GatewayError> {
        let handle = self.handle(name)?;
        let _lifecycle = handle.lock_lifecycle().await;

        handle.client().disconnect().await;
        self.set_status(&handle, SessionStatus::Disconnected).await;
        info!(session = %name, "session restarting");
        self.connect_locked(&handle).await
    }

    /// Request a phone-number pairing code (`ABCD-EFGH`).
    pub async fn pair_phone(&self, name: &str, phone: &str) -> Result<String, GatewayError> {
        let phone = normalize_phone(phone)?;
        let handle = self.handle(name)?;
        let _lifecycle = handle.lock_lifecycle().await;

        if handle.is_authenticated() || handle.status() == SessionStatus::Connected {
            return Err(GatewayError::InvalidRequest(format!(
                "session {name} is already paired"
            )));
        }
        if handle.status() == SessionStatus::Disconnected {
            self.connect_locked(&handle).await?;
        }

        let raw = handle.client().pair_phone(&phone).await?;
        let code = format_pairing_code(&raw)?;
        handle.update(|s| s.phone = Some(phone.clone()));
        if let Err(e) = self.store.set_session_phone(&handle.id, &phone).await {
            error!(session = %name, "storing pairing phone failed: {e}");
        }
        info!(session = %name, "pairing code issued");
        Ok(code)
    }

    /// Load persisted sessions and reconnect the ones that are paired.
    pub async fn restore(&self) -> Result<usize, GatewayError> {
        let records = self.store.list_sessions().await?;
        let mut restored = 0;
        for record in records {
            if self.lookup(&record.name).is_some() {
                continue;
            }
            let handle = match self.attach(&record).await {
                Ok(h) => h,
                Err(e) => {
                    error!(session = %record.name, "restore failed: {e}");
                    continue;
                }
            };
            if record.status != SessionStatus::Disconnected {
                self.persist_status(&handle, SessionStatus::Disconnected).await;
            }
            if let Err(e) = self.insert(handle) {
                warn!(session = %record.name, "restore skipped: {e}");
                continue;
            }
            restored += 1;

            if record.device_jid.is_some() {
                if let Some(registry) = self.me.upgrade() {
                    let name = record.name.clone();
                    self.tracker.spawn(async move {
                        if let Err(e) = registry.connect(&name).await {
                            warn!(session = %name, "auto-connect failed: {e}");
                        }
                    });
                }
            }
        }
        info!(restored, "sessions restored");
        Ok(restored)
    }

    /// Disconnect every client. Contexts are cancelled through the root token.
    pub async fn shutdown(&self) {
        for handle in self.all() {
            if handle.client().is_connected() {
                handle.client().disconnect().await;
                debug!(session = %handle.name, "session disconnected for shutdown");
            }
        }
    }

    async fn apply_signal(&self, name: &str, signal: SessionSignal) {
        let Some(handle) = self.lookup(name) else {
            return;
        };
        match signal {
            SessionSignal::Connected => {
                let learned = handle.client().device_jid();
                let newly_known = handle.update(|s| {
                    s.set_status(SessionStatus::Connected);
                    match (&s.device_jid, learned) {
                        (None, Some(jid)) => {
                            s.device_jid = Some(jid.clone());
                            Some(jid)
                        }
                        _ => None,
                    }
                });
                if let Some(jid) = newly_known {
                    if let Err(e) = self.store.set_session_device(&handle.id, Some(&jid)).await {
                        error!(session = %name, "storing device jid failed: {e}");
                    }
                }
            }
            SessionSignal::Disconnected => {
                handle.update(|s| s.set_status(SessionStatus::Disconnected));
            }
            SessionSignal::LoggedOut { reason } => {
                info!(session = %name, %reason, "device logged out");
                handle.update(|s| {
                    s.set_status(SessionStatus::Disconnected);
                    s.device_jid = None;
                });
            }
            SessionSignal::Paired { jid } => {
                handle.update(|s| s.device_jid = Some(jid));
            }
        }
    }

    fn spawn_qr_watch(&self, handle: Arc<SessionHandle>, mut rx: mpsc::Receiver<QrEvent>) {
        let Some(registry) = self.me.upgrade() else {
            return;
        };
        let cancel = handle.context().cancel.clone();
        self.tracker.spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    ev = rx.recv() => match ev {
                        Some(ev) => ev,
                        None => break,
                    },
                };
                if !registry.on_qr_event(&handle, event).await {
                    break;
                }
            }
            debug!(session = %handle.name, "qr watch stopped");
        });
    }

    /// Returns whether the pairing flow is still running.
    async fn on_qr_event(&self, handle: &Arc<SessionHandle>, event: QrEvent) -> bool {
        match event {
            QrEvent::Code(code) => {
                if !handle.update(|s| s.accept_qr(code.clone())) {
                    debug!(session = %handle.name, "ignoring qr code outside pairing");
                    return true;
                }
                self.persist_status(handle, SessionStatus::Qr).await;
                self.dispatcher
                    .emit(handle.context(), EventKind::SessionQr, json!({ "qr": code }))
                    .await;
                true
            }
            QrEvent::Success => {
                let jid = handle.client().device_jid();
                handle.update(|s| {
                    s.set_status(SessionStatus::Connected);
                    if jid.is_some() {
                        s.device_jid = jid.clone();
                    }
                });
                self.persist_status(handle, SessionStatus::Connected).await;
                if let Some(jid) = jid {
                    if let Err(e) = self.store.set_session_device(&handle.id, Some(&jid)).await {
                        error!(session = %handle.name, "storing device jid failed: {e}");
                    }
                }
                info!(session = %handle.name, "qr pairing succeeded");
                false
            }
            QrEvent::Timeout => {
                warn!(session = %handle.name, "qr pairing timed out");
                handle.client().disconnect().await;
                self.set_status(handle, SessionStatus::Disconnected).await;
                false
            }
            QrEvent::Error(reason) => {
                warn!(session = %handle.name, %reason, "qr pairing failed");
                handle.client().disconnect().await;
                self.set_status(handle, SessionStatus::Disconnected).await;
                self.dispatcher
                    .emit(
                        handle.context(),
                        EventKind::SessionPairError,
                        json!({ "error": reason }),
                    )
                    .await;
                false
            }
        }
    }

    async fn set_status(&self, handle: &SessionHandle, status: SessionStatus) {
        handle.update(|s| s.set_status(status));
        self.persist_status(handle, status).await;
    }

    async fn persist_status(&self, handle: &SessionHandle, status: SessionStatus) {
        if let Err(e) = self.store.update_session_status(&handle.id, status).await {
            error!(session = %handle.name, %status, "status update failed: {e}");
        }
    }
}
