//! Multi-tenant SQLite backend for `whatsapp-rust`.
//!
//! Every session's signal keys, app-state, and device identity share one
//! database file; rows are partitioned by `device_id` (the session id), so a
//! [`SqlxDeviceStore`] only ever sees its own session. Implements the
//! library's `Backend` traits (signal, app-sync, protocol, device).

mod app_sync;
mod device;
mod protocol;
mod signal;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use wacore::store::error::db_err;
use wagate_core::error::GatewayError;

type Result<T> = wacore::store::error::Result<T>;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS wa_devices (
        device_id TEXT PRIMARY KEY,
        data BLOB,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS wa_identities (
        device_id TEXT NOT NULL, address TEXT NOT NULL, key_data BLOB NOT NULL,
        PRIMARY KEY (device_id, address)
    )",
    "CREATE TABLE IF NOT EXISTS wa_sessions (
        device_id TEXT NOT NULL, address TEXT NOT NULL, session_data BLOB NOT NULL,
        PRIMARY KEY (device_id, address)
    )",
    "CREATE TABLE IF NOT EXISTS wa_prekeys (
        device_id TEXT NOT NULL, id INTEGER NOT NULL, record BLOB NOT NULL,
        uploaded INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (device_id, id)
    )",
    "CREATE TABLE IF NOT EXISTS wa_signed_prekeys (
        device_id TEXT NOT NULL, id INTEGER NOT NULL, record BLOB NOT NULL,
        PRIMARY KEY (device_id, id)
    )",
    "CREATE TABLE IF NOT EXISTS wa_sender_keys (
        device_id TEXT NOT NULL, address TEXT NOT NULL, record BLOB NOT NULL,
        PRIMARY KEY (device_id, address)
    )",
    "CREATE TABLE IF NOT EXISTS wa_app_sync_keys (
        device_id TEXT NOT NULL, key_id BLOB NOT NULL, key_data BLOB NOT NULL,
        timestamp INTEGER NOT NULL DEFAULT 0, fingerprint BLOB,
        PRIMARY KEY (device_id, key_id)
    )",
    "CREATE TABLE IF NOT EXISTS wa_app_versions (
        device_id TEXT NOT NULL, collection TEXT NOT NULL, data TEXT NOT NULL,
        PRIMARY KEY (device_id, collection)
    )",
    "CREATE TABLE IF NOT EXISTS wa_mutation_macs (
        device_id TEXT NOT NULL, collection TEXT NOT NULL, index_mac BLOB NOT NULL,
        version INTEGER NOT NULL, value_mac BLOB NOT NULL,
        PRIMARY KEY (device_id, collection, index_mac)
    )",
    "CREATE TABLE IF NOT EXISTS wa_skdm_recipients (
        device_id TEXT NOT NULL, group_jid TEXT NOT NULL, device_jid TEXT NOT NULL,
        PRIMARY KEY (device_id, group_jid, device_jid)
    )",
    "CREATE TABLE IF NOT EXISTS wa_lid_mappings (
        device_id TEXT NOT NULL, lid TEXT NOT NULL, phone_number TEXT NOT NULL,
        created_at INTEGER NOT NULL DEFAULT 0, updated_at INTEGER NOT NULL DEFAULT 0,
        learning_source TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (device_id, lid)
    )",
    "CREATE TABLE IF NOT EXISTS wa_base_keys (
        device_id TEXT NOT NULL, address TEXT NOT NULL, message_id TEXT NOT NULL,
        base_key BLOB NOT NULL,
        PRIMARY KEY (device_id, address, message_id)
    )",
    "CREATE TABLE IF NOT EXISTS wa_device_lists (
        device_id TEXT NOT NULL, user TEXT NOT NULL, data TEXT NOT NULL,
        PRIMARY KEY (device_id, user)
    )",
    "CREATE TABLE IF NOT EXISTS wa_forget_sender_keys (
        device_id TEXT NOT NULL, group_jid TEXT NOT NULL, participant TEXT NOT NULL,
        PRIMARY KEY (device_id, group_jid, participant)
    )",
];

/// Tables holding per-device rows, purged together on logout/delete.
const DEVICE_TABLES: &[&str] = &[
    "wa_identities",
    "wa_sessions",
    "wa_prekeys",
    "wa_signed_prekeys",
    "wa_sender_keys",
    "wa_app_sync_keys",
    "wa_app_versions",
    "wa_mutation_macs",
    "wa_skdm_recipients",
    "wa_lid_mappings",
    "wa_base_keys",
    "wa_device_lists",
    "wa_forget_sender_keys",
    "wa_devices",
];

/// Open (creating if needed) the shared device database.
///
/// In-memory URLs need `max_connections = 1`; each connection would
/// otherwise get its own empty database.
pub async fn open_pool(
    url: &str,
    max_connections: u32,
) -> std::result::Result<SqlitePool, GatewayError> {
    let opts = SqliteConnectOptions::from_str(url)
        .map_err(|e| GatewayError::Config(format!("device store url '{url}': {e}")))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(opts)
        .await
        .map_err(|e| GatewayError::Database(format!("device store open: {e}")))?;
    for stmt in SCHEMA {
        sqlx::query(stmt)
            .execute(&pool)
            .await
            .map_err(|e| GatewayError::Database(format!("device store schema: {e}")))?;
    }
    Ok(pool)
}

/// One session's view of the shared device database.
#[derive(Clone)]
pub struct SqlxDeviceStore {
    pool: SqlitePool,
    device_id: String,
}

impl SqlxDeviceStore {
    pub fn new(pool: SqlitePool, device_id: &str) -> Self {
        Self {
            pool,
            device_id: device_id.to_string(),
        }
    }

    /// Register an empty device row so the session shows up as provisioned.
    pub async fn provision(&self) -> std::result::Result<(), GatewayError> {
        sqlx::query("INSERT OR IGNORE INTO wa_devices (device_id, created_at) VALUES (?, ?)")
            .bind(&self.device_id)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| GatewayError::Database(format!("provision device: {e}")))?;
        Ok(())
    }

    /// Drop every key and credential of this device.
    pub async fn purge(&self) -> std::result::Result<(), GatewayError> {
        let err = |e: sqlx::Error| GatewayError::Database(format!("purge device: {e}"));
        let mut tx = self.pool.begin().await.map_err(err)?;
        for table in DEVICE_TABLES {
            sqlx::query(&format!("DELETE FROM {table} WHERE device_id = ?"))
                .bind(&self.device_id)
                .execute(&mut *tx)
                .await
                .map_err(err)?;
        }
        tx.commit().await.map_err(err)
    }

    /// Single BLOB column keyed by a text column.
    async fn blob_by_text(&self, sql: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(sql)
            .bind(&self.device_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|(d,)| d))
    }

    /// Single BLOB column keyed by an integer id.
    async fn blob_by_id(&self, sql: &str, id: u32) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(sql)
            .bind(&self.device_id)
            .bind(i64::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|(d,)| d))
    }

    /// `(device_id, key, value)` upsert or `(device_id, key)` delete.
    async fn exec_text(&self, sql: &str, key: &str, value: Option<&[u8]>) -> Result<()> {
        let mut q = sqlx::query(sql).bind(&self.device_id).bind(key);
        if let Some(value) = value {
            q = q.bind(value);
        }
        q.execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }
}
