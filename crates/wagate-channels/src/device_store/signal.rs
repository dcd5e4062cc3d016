//! Signal-protocol material: identities, sessions, prekeys, sender keys.

use async_trait::async_trait;
use wacore::store::error::db_err;
use wacore::store::traits::SignalStore;

use super::{Result, SqlxDeviceStore};

#[async_trait]
impl SignalStore for SqlxDeviceStore {
    async fn put_identity(&self, address: &str, key: [u8; 32]) -> Result<()> {
        self.exec_text(
            "INSERT OR REPLACE INTO wa_identities (device_id, address, key_data) VALUES (?, ?, ?)",
            address,
            Some(key.as_slice()),
        )
        .await
    }

    async fn load_identity(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.blob_by_text(
            "SELECT key_data FROM wa_identities WHERE device_id = ? AND address = ?",
            address,
        )
        .await
    }

    async fn delete_identity(&self, address: &str) -> Result<()> {
        self.exec_text(
            "DELETE FROM wa_identities WHERE device_id = ? AND address = ?",
            address,
            None,
        )
        .await
    }

    async fn get_session(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.blob_by_text(
            "SELECT session_data FROM wa_sessions WHERE device_id = ? AND address = ?",
            address,
        )
        .await
    }

    async fn put_session(&self, address: &str, session: &[u8]) -> Result<()> {
        self.exec_text(
            "INSERT OR REPLACE INTO wa_sessions (device_id, address, session_data) VALUES (?, ?, ?)",
            address,
            Some(session),
        )
        .await
    }

    async fn delete_session(&self, address: &str) -> Result<()> {
        self.exec_text(
            "DELETE FROM wa_sessions WHERE device_id = ? AND address = ?",
            address,
            None,
        )
        .await
    }

    async fn store_prekey(&self, id: u32, record: &[u8], uploaded: bool) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO wa_prekeys (device_id, id, record, uploaded) VALUES (?, ?, ?, ?)",
        )
        .bind(&self.device_id)
        .bind(i64::from(id))
        .bind(record)
        .bind(uploaded)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.blob_by_id(
            "SELECT record FROM wa_prekeys WHERE device_id = ? AND id = ?",
            id,
        )
        .await
    }

    async fn remove_prekey(&self, id: u32) -> Result<()> {
        sqlx::query("DELETE FROM wa_prekeys WHERE device_id = ? AND id = ?")
            .bind(&self.device_id)
            .bind(i64::from(id))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn store_signed_prekey(&self, id: u32, record: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO wa_signed_prekeys (device_id, id, record) VALUES (?, ?, ?)",
        )
        .bind(&self.device_id)
        .bind(i64::from(id))
        .bind(record)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_signed_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        self.blob_by_id(
            "SELECT record FROM wa_signed_prekeys WHERE device_id = ? AND id = ?",
            id,
        )
        .await
    }

    async fn load_all_signed_prekeys(&self) -> Result<Vec<(u32, Vec<u8>)>> {
        let rows: Vec<(i64, Vec<u8>)> =
            sqlx::query_as("SELECT id, record FROM wa_signed_prekeys WHERE device_id = ?")
                .bind(&self.device_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, r)| u32::try_from(id).ok().map(|id| (id, r)))
            .collect())
    }

    async fn remove_signed_prekey(&self, id: u32) -> Result<()> {
        sqlx::query("DELETE FROM wa_signed_prekeys WHERE device_id = ? AND id = ?")
            .bind(&self.device_id)
            .bind(i64::from(id))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn put_sender_key(&self, address: &str, record: &[u8]) -> Result<()> {
        self.exec_text(
            "INSERT OR REPLACE INTO wa_sender_keys (device_id, address, record) VALUES (?, ?, ?)",
            address,
            Some(record),
        )
        .await
    }

    async fn get_sender_key(&self, address: &str) -> Result<Option<Vec<u8>>> {
        self.blob_by_text(
            "SELECT record FROM wa_sender_keys WHERE device_id = ? AND address = ?",
            address,
        )
        .await
    }

    async fn delete_sender_key(&self, address: &str) -> Result<()> {
        self.exec_text(
            "DELETE FROM wa_sender_keys WHERE device_id = ? AND address = ?",
            address,
            None,
        )
        .await
    }
}
