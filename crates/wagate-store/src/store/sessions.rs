//! Session rows.

use super::{db_err, now, parse_ts, Store};
use sqlx::Row;
use uuid::Uuid;
use wagate_core::{
    error::GatewayError,
    records::{SessionRecord, SessionStatus},
};

const SESSION_COLUMNS: &str =
    "id, name, device_jid, phone, status, push_name, created_at, updated_at";

fn session_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SessionRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(SessionRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        device_jid: row.try_get("device_jid")?,
        phone: row.try_get("phone")?,
        status: SessionStatus::parse(&status),
        push_name: row.try_get("push_name")?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

impl Store {
    /// Insert a new session. Names are unique.
    pub async fn create_session(&self, name: &str) -> Result<SessionRecord, GatewayError> {
        if self.get_session_by_name(name).await?.is_some() {
            return Err(GatewayError::SessionAlreadyExists(name.to_string()));
        }
        let id = Uuid::new_v4().to_string();
        let ts = now();
        let result = sqlx::query(
            "INSERT INTO sessions (id, name, status, created_at, updated_at) \
             VALUES (?, ?, 'disconnected', ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(GatewayError::SessionAlreadyExists(name.to_string()));
            }
            Err(e) => return Err(db_err("create session")(e)),
        }

        self.get_session(&id)
            .await?
            .ok_or_else(|| GatewayError::Internal(format!("session {id} vanished after insert")))
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRecord>, GatewayError> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("get session"))?;
        row.as_ref()
            .map(session_from_row)
            .transpose()
            .map_err(db_err("decode session"))
    }

    pub async fn get_session_by_name(
        &self,
        name: &str,
    ) -> Result<Option<SessionRecord>, GatewayError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get session by name"))?;
        row.as_ref()
            .map(session_from_row)
            .transpose()
            .map_err(db_err("decode session"))
    }

    /// All sessions, oldest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>, GatewayError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list sessions"))?;
        rows.iter()
            .map(session_from_row)
            .collect::<Result<_, _>>()
            .map_err(db_err("decode session"))
    }

    pub async fn update_session_status(
        &self,
        id: &str,
        status: SessionStatus,
    ) -> Result<(), GatewayError> {
        sqlx::query("UPDATE sessions SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("update session status"))?;
        Ok(())
    }

    /// Record the authenticated device JID and the phone it belongs to.
    pub async fn set_session_device(
        &self,
        id: &str,
        device_jid: Option<&str>,
    ) -> Result<(), GatewayError> {
        let phone = device_jid.map(|j| wagate_core::jid::user_part(j).to_string());
        sqlx::query("UPDATE sessions SET device_jid = ?, phone = ?, updated_at = ? WHERE id = ?")
            .bind(device_jid)
            .bind(phone)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("set session device"))?;
        Ok(())
    }

    /// Phone a pairing code was requested for, before the device is known.
    pub async fn set_session_phone(&self, id: &str, phone: &str) -> Result<(), GatewayError> {
        sqlx::query("UPDATE sessions SET phone = ?, updated_at = ? WHERE id = ?")
            .bind(phone)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("set session phone"))?;
        Ok(())
    }

    pub async fn set_session_push_name(
        &self,
        id: &str,
        push_name: &str,
    ) -> Result<(), GatewayError> {
        sqlx::query("UPDATE sessions SET push_name = ?, updated_at = ? WHERE id = ?")
            .bind(push_name)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("set session push name"))?;
        Ok(())
    }

    /// Delete a session and every record that references it.
    pub async fn delete_session(&self, id: &str) -> Result<bool, GatewayError> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin delete"))?;
        for table in ["media", "messages", "webhooks", "chats"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE session_id = ?"))
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err("purge session records"))?;
        }
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err("delete session"))?;
        tx.commit().await.map_err(db_err("commit delete"))?;
        Ok(result.rows_affected() > 0)
    }
}
