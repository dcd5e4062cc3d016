//! Webhook subscription CRUD.

use super::{db_err, now, parse_ts, Store};
use sqlx::Row;
use uuid::Uuid;
use wagate_core::{error::GatewayError, records::WebhookRecord};

const WEBHOOK_COLUMNS: &str =
    "id, session_id, url, events, enabled, secret, created_at, updated_at";

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct WebhookUpdate {
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub enabled: Option<bool>,
    /// `Some(None)` clears the secret.
    pub secret: Option<Option<String>>,
}

fn webhook_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WebhookRecord, sqlx::Error> {
    let events: String = row.try_get("events")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(WebhookRecord {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        url: row.try_get("url")?,
        events: serde_json::from_str(&events).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        enabled: row.try_get("enabled")?,
        secret: row.try_get("secret")?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

impl Store {
    /// Insert a webhook. The URL must already have passed the URL policy.
    pub async fn create_webhook(
        &self,
        session_id: &str,
        url: &str,
        events: &[String],
        enabled: bool,
        secret: Option<&str>,
    ) -> Result<WebhookRecord, GatewayError> {
        let id = Uuid::new_v4().to_string();
        let events_json = serde_json::to_string(events)?;
        let ts = now();
        sqlx::query(
            "INSERT INTO webhooks (id, session_id, url, events, enabled, secret, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(session_id)
        .bind(url)
        .bind(&events_json)
        .bind(enabled)
        .bind(secret.filter(|s| !s.is_empty()))
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await
        .map_err(db_err("create webhook"))?;

        self.get_webhook(session_id, &id)
            .await?
            .ok_or_else(|| GatewayError::Internal(format!("webhook {id} vanished after insert")))
    }

    pub async fn get_webhook(
        &self,
        session_id: &str,
        id: &str,
    ) -> Result<Option<WebhookRecord>, GatewayError> {
        let row = sqlx::query(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE session_id = ? AND id = ?"
        ))
        .bind(session_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get webhook"))?;
        row.as_ref()
            .map(webhook_from_row)
            .transpose()
            .map_err(db_err("decode webhook"))
    }

    pub async fn list_webhooks(&self, session_id: &str) -> Result<Vec<WebhookRecord>, GatewayError> {
        let rows = sqlx::query(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE session_id = ? ORDER BY created_at ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list webhooks"))?;
        rows.iter()
            .map(webhook_from_row)
            .collect::<Result<_, _>>()
            .map_err(db_err("decode webhook"))
    }

    /// Enabled webhooks for a session; the delivery fan-out reads this per event.
    pub async fn enabled_webhooks(
        &self,
        session_id: &str,
    ) -> Result<Vec<WebhookRecord>, GatewayError> {
        let rows = sqlx::query(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE session_id = ? AND enabled = 1"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("enabled webhooks"))?;
        rows.iter()
            .map(webhook_from_row)
            .collect::<Result<_, _>>()
            .map_err(db_err("decode webhook"))
    }

    /// Apply a partial update. Returns `None` if the webhook does not exist.
    pub async fn update_webhook(
        &self,
        session_id: &str,
        id: &str,
        update: &WebhookUpdate,
    ) -> Result<Option<WebhookRecord>, GatewayError> {
        let Some(mut current) = self.get_webhook(session_id, id).await? else {
            return Ok(None);
        };
        if let Some(url) = &update.url {
            current.url = url.clone();
        }
        if let Some(events) = &update.events {
            current.events = events.clone();
        }
        if let Some(enabled) = update.enabled {
            current.enabled = enabled;
        }
        if let Some(secret) = &update.secret {
            current.secret = secret.clone().filter(|s| !s.is_empty());
        }

        sqlx::query(
            "UPDATE webhooks SET url = ?, events = ?, enabled = ?, secret = ?, updated_at = ? \
             WHERE session_id = ? AND id = ?",
        )
        .bind(&current.url)
        .bind(serde_json::to_string(&current.events)?)
        .bind(current.enabled)
        .bind(&current.secret)
        .bind(now())
        .bind(session_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err("update webhook"))?;

        self.get_webhook(session_id, id).await
    }

    pub async fn delete_webhook(&self, session_id: &str, id: &str) -> Result<bool, GatewayError> {
        let result = sqlx::query("DELETE FROM webhooks WHERE session_id = ? AND id = ?")
            .bind(session_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("delete webhook"))?;
        Ok(result.rows_affected() > 0)
    }
}
