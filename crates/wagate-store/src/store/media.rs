//! Media rows and download bookkeeping.

use super::{db_err, now, parse_ts, Store};
use sqlx::Row;
use wagate_core::{
    error::GatewayError,
    records::{Direction, MediaRecord},
};

const MEDIA_COLUMNS: &str = "id, session_id, msg_id, chat_jid, sender_jid, direction, \
     media_type, mime_type, file_size, file_name, wa_direct_path, wa_media_key, wa_file_sha256, \
     wa_file_enc_sha256, wa_media_key_timestamp, width, height, storage_key, storage_url, \
     stored_at, downloaded, download_error, download_attempts, created_at";

const PENDING_FILTER: &str = "downloaded = 0 AND wa_direct_path != '' \
     AND length(wa_media_key) > 0 AND download_attempts < ?";

fn media_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MediaRecord, sqlx::Error> {
    let direction: String = row.try_get("direction")?;
    let stored_at: Option<String> = row.try_get("stored_at")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(MediaRecord {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        msg_id: row.try_get("msg_id")?,
        chat_jid: row.try_get("chat_jid")?,
        sender_jid: row.try_get("sender_jid")?,
        direction: if direction == "sent" {
            Direction::Sent
        } else {
            Direction::Received
        },
        media_type: row.try_get("media_type")?,
        mime_type: row.try_get("mime_type")?,
        file_size: row.try_get("file_size")?,
        file_name: row.try_get("file_name")?,
        wa_direct_path: row.try_get("wa_direct_path")?,
        wa_media_key: row.try_get("wa_media_key")?,
        wa_file_sha256: row.try_get("wa_file_sha256")?,
        wa_file_enc_sha256: row.try_get("wa_file_enc_sha256")?,
        wa_media_key_timestamp: row.try_get("wa_media_key_timestamp")?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        storage_key: row.try_get("storage_key")?,
        storage_url: row.try_get("storage_url")?,
        stored_at: stored_at.as_deref().map(parse_ts),
        downloaded: row.try_get("downloaded")?,
        download_error: row.try_get("download_error")?,
        download_attempts: row.try_get("download_attempts")?,
        created_at: parse_ts(&created_at),
    })
}

impl Store {
    /// Insert a media row, or refresh its download keys while it is still pending.
    ///
    /// Stored rows are left untouched so a replayed message cannot un-store media.
    pub async fn upsert_media(&self, media: &MediaRecord) -> Result<(), GatewayError> {
        sqlx::query(&format!(
            "INSERT INTO media ({MEDIA_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(session_id, msg_id) DO UPDATE SET \
                wa_direct_path = excluded.wa_direct_path, \
                wa_media_key = excluded.wa_media_key, \
                wa_file_sha256 = excluded.wa_file_sha256, \
                wa_file_enc_sha256 = excluded.wa_file_enc_sha256, \
                wa_media_key_timestamp = excluded.wa_media_key_timestamp, \
                file_size = excluded.file_size, \
                mime_type = excluded.mime_type \
             WHERE media.downloaded = 0"
        ))
        .bind(&media.id)
        .bind(&media.session_id)
        .bind(&media.msg_id)
        .bind(&media.chat_jid)
        .bind(&media.sender_jid)
        .bind(media.direction.as_str())
        .bind(&media.media_type)
        .bind(&media.mime_type)
        .bind(media.file_size)
        .bind(&media.file_name)
        .bind(&media.wa_direct_path)
        .bind(&media.wa_media_key)
        .bind(&media.wa_file_sha256)
        .bind(&media.wa_file_enc_sha256)
        .bind(media.wa_media_key_timestamp)
        .bind(media.width)
        .bind(media.height)
        .bind(&media.storage_key)
        .bind(&media.storage_url)
        .bind(media.stored_at.map(|t| t.to_rfc3339()))
        .bind(media.downloaded)
        .bind(&media.download_error)
        .bind(media.download_attempts)
        .bind(media.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err("upsert media"))?;
        Ok(())
    }

    pub async fn get_media(
        &self,
        session_id: &str,
        msg_id: &str,
    ) -> Result<Option<MediaRecord>, GatewayError> {
        let row = sqlx::query(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media WHERE session_id = ? AND msg_id = ?"
        ))
        .bind(session_id)
        .bind(msg_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get media"))?;
        row.as_ref()
            .map(media_from_row)
            .transpose()
            .map_err(db_err("decode media"))
    }

    /// Rows eligible for automatic download, oldest first.
    pub async fn pending_media(
        &self,
        session_id: &str,
        max_attempts: i64,
        limit: u32,
    ) -> Result<Vec<MediaRecord>, GatewayError> {
        let rows = sqlx::query(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media \
             WHERE session_id = ? AND {PENDING_FILTER} \
             ORDER BY created_at ASC LIMIT ?"
        ))
        .bind(session_id)
        .bind(max_attempts)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("pending media"))?;
        rows.iter()
            .map(media_from_row)
            .collect::<Result<_, _>>()
            .map_err(db_err("decode media"))
    }

    /// Sessions with at least one row eligible for automatic download.
    pub async fn sessions_with_pending_media(
        &self,
        max_attempts: i64,
    ) -> Result<Vec<String>, GatewayError> {
        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT DISTINCT session_id FROM media WHERE {PENDING_FILTER}"
        ))
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("sessions with pending media"))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Record a successful store. Key and URL are required together.
    pub async fn mark_media_stored(
        &self,
        id: &str,
        storage_key: &str,
        storage_url: &str,
    ) -> Result<(), GatewayError> {
        if storage_key.is_empty() || storage_url.is_empty() {
            return Err(GatewayError::Internal(
                "stored media needs both a key and a url".into(),
            ));
        }
        sqlx::query(
            "UPDATE media SET downloaded = 1, storage_key = ?, storage_url = ?, \
             stored_at = ?, download_error = NULL WHERE id = ?",
        )
        .bind(storage_key)
        .bind(storage_url)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err("mark media stored"))?;
        Ok(())
    }

    /// Record a failed attempt. The attempt counter only grows.
    pub async fn mark_media_failed(&self, id: &str, error: &str) -> Result<(), GatewayError> {
        sqlx::query(
            "UPDATE media SET download_attempts = download_attempts + 1, download_error = ? \
             WHERE id = ?",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err("mark media failed"))?;
        Ok(())
    }
}
