//! Device identity persistence.
//!
//! The library's `Device` carries fixed-size key arrays with custom serde
//! that only round-trips through a binary format, hence bincode.

use async_trait::async_trait;
use wacore::store::error::{db_err, StoreError};
use wacore::store::traits::DeviceStore;
use wacore::store::Device;

use super::{Result, SqlxDeviceStore};
use wagate_core::error::GatewayError;

impl SqlxDeviceStore {
    /// The phone-number jid this device paired as, if pairing ever finished.
    pub async fn paired_jid(&self) -> std::result::Result<Option<String>, GatewayError> {
        let device = self
            .load()
            .await
            .map_err(|e| GatewayError::Database(format!("load device: {e}")))?;
        Ok(device.and_then(|d| d.pn.as_ref().map(|j| j.to_string())))
    }
}

#[async_trait]
impl DeviceStore for SqlxDeviceStore {
    async fn save(&self, device: &Device) -> Result<()> {
        let data =
            bincode::serialize(device).map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO wa_devices (device_id, data, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(device_id) DO UPDATE SET data = excluded.data",
        )
        .bind(&self.device_id)
        .bind(&data)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<Device>> {
        let row: Option<(Option<Vec<u8>>,)> =
            sqlx::query_as("SELECT data FROM wa_devices WHERE device_id = ?")
                .bind(&self.device_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        match row {
            Some((Some(data),)) => bincode::deserialize(&data)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            _ => Ok(None),
        }
    }

    async fn exists(&self) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM wa_devices WHERE device_id = ? AND data IS NOT NULL",
        )
        .bind(&self.device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.is_some())
    }

    async fn create(&self) -> Result<i32> {
        // One device per partition; the row is filled in by `save`.
        Ok(1)
    }
}
