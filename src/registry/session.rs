use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, MutexGuard};
use wagate_core::{
    error::GatewayError,
    records::{SessionRecord, SessionStatus},
    traits::ProtocolClient,
};
use wagate_dispatch::{Mailbox, SessionContext};

/// Read-only view of a session handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub device_jid: Option<String>,
    pub phone: Option<String>,
    pub status: SessionStatus,
    /// Current pairing code; empty unless `status` is `qr`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub qr_code: String,
    pub push_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields that change after creation.
#[derive(Debug, Clone)]
pub(super) struct SessionState {
    pub status: SessionStatus,
    qr_code: String,
    pub device_jid: Option<String>,
    pub phone: Option<String>,
    pub push_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// A freshly attached session is never connected yet.
    pub fn from_record(record: &SessionRecord) -> Self {
        Self {
            status: SessionStatus::Disconnected,
            qr_code: String::new(),
            device_jid: record.device_jid.clone(),
            phone: record.phone.clone(),
            push_name: record.push_name.clone(),
            updated_at: record.updated_at,
        }
    }

    /// Any status other than `qr` drops the cached code.
    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        if status != SessionStatus::Qr {
            self.qr_code.clear();
        }
        self.updated_at = Utc::now();
    }

    /// Show a new pairing code. Codes only apply while pairing is underway,
    /// a late one after the session connected or dropped is refused.
    pub fn accept_qr(&mut self, code: String) -> bool {
        if !matches!(self.status, SessionStatus::Connecting | SessionStatus::Qr) {
            return false;
        }
        self.status = SessionStatus::Qr;
        self.qr_code = code;
        self.updated_at = Utc::now();
        true
    }
}

/// A registered session and everything it owns.
pub struct SessionHandle {
    pub id: String,
    pub name: String,
    created_at: DateTime<Utc>,
    client: Arc<dyn ProtocolClient>,
    ctx: SessionContext,
    mailbox: Mailbox,
    state: RwLock<SessionState>,
    lifecycle: Mutex<()>,
}

impl SessionHandle {
    pub(super) fn new(
        record: &SessionRecord,
        client: Arc<dyn ProtocolClient>,
        ctx: SessionContext,
        mailbox: Mailbox,
        state: SessionState,
    ) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            created_at: record.created_at,
            client,
            ctx,
            mailbox,
            state: RwLock::new(state),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Session {
        let state = self
            .state
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone());
        Session {
            id: self.id.clone(),
            name: self.name.clone(),
            device_jid: state.device_jid,
            phone: state.phone,
            status: state.status,
            qr_code: state.qr_code,
            push_name: state.push_name,
            created_at: self.created_at,
            updated_at: state.updated_at,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state
            .read()
            .map(|s| s.status)
            .unwrap_or(SessionStatus::Disconnected)
    }

    pub fn client(&self) -> &Arc<dyn ProtocolClient> {
        &self.client
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Paired according to the stored record or the live client.
    pub fn is_authenticated(&self) -> bool {
        let stored = self
            .state
            .read()
            .map(|s| s.device_jid.is_some())
            .unwrap_or(false);
        stored || self.client.device_jid().is_some()
    }

    /// The client, if its transport is up.
    pub fn connected_client(&self) -> Result<Arc<dyn ProtocolClient>, GatewayError> {
        if self.client.is_connected() {
            Ok(Arc::clone(&self.client))
        } else {
            Err(GatewayError::SessionNotConnected(self.name.clone()))
        }
    }

    /// Own JID for outgoing message rows.
    pub fn own_jid(&self) -> String {
        self.client
            .device_jid()
            .or_else(|| self.state.read().ok().and_then(|s| s.device_jid.clone()))
            .unwrap_or_default()
    }

    pub(super) fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub(super) async fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().await
    }
}
