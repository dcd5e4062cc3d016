//! Message storage, receipt tracking, and history queries.

use super::{db_err, status_rank_sql, Store};
use sqlx::Row;
use wagate_core::{
    error::GatewayError,
    records::{MessageRecord, MessageStatus, MessageType},
};

const MESSAGE_COLUMNS: &str = "session_id, message_id, chat_jid, sender_jid, timestamp, \
     push_name, msg_type, media_type, content, from_me, is_group, is_ephemeral, is_view_once, \
     is_edit, edit_target_id, quoted_id, quoted_sender, status, raw";

/// Upper bound on a single history page.
const MAX_PAGE: i64 = 500;

/// Filters for [`Store::list_messages`].
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub chat: Option<String>,
    /// Only messages strictly older than this unix timestamp.
    pub before: Option<i64>,
    pub limit: Option<i64>,
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MessageRecord, sqlx::Error> {
    let msg_type: String = row.try_get("msg_type")?;
    let status: String = row.try_get("status")?;
    Ok(MessageRecord {
        session_id: row.try_get("session_id")?,
        message_id: row.try_get("message_id")?,
        chat_jid: row.try_get("chat_jid")?,
        sender_jid: row.try_get("sender_jid")?,
        timestamp: row.try_get("timestamp")?,
        push_name: row.try_get("push_name")?,
        msg_type: MessageType::parse(&msg_type).unwrap_or(MessageType::Text),
        media_type: row.try_get("media_type")?,
        content: row.try_get("content")?,
        from_me: row.try_get("from_me")?,
        is_group: row.try_get("is_group")?,
        is_ephemeral: row.try_get("is_ephemeral")?,
        is_view_once: row.try_get("is_view_once")?,
        is_edit: row.try_get("is_edit")?,
        edit_target_id: row.try_get("edit_target_id")?,
        quoted_id: row.try_get("quoted_id")?,
        quoted_sender: row.try_get("quoted_sender")?,
        status: MessageStatus::parse(&status),
        raw: row.try_get("raw")?,
    })
}

impl Store {
    /// Insert or refresh a message keyed on `(session_id, message_id)`.
    ///
    /// A replay (history sync after a live event, or vice versa) never moves
    /// the delivery status backwards and keeps the first raw blob it saw.
    /// An edit that was stored before this message arrived is applied to it.
    pub async fn upsert_message(&self, msg: &MessageRecord) -> Result<(), GatewayError> {
        let sql = format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(session_id, message_id) DO UPDATE SET \
                chat_jid = excluded.chat_jid, \
                sender_jid = excluded.sender_jid, \
                timestamp = excluded.timestamp, \
                push_name = COALESCE(excluded.push_name, messages.push_name), \
                msg_type = excluded.msg_type, \
                media_type = excluded.media_type, \
                content = CASE WHEN messages.is_edit = 1 THEN messages.content ELSE excluded.content END, \
                is_group = excluded.is_group, \
                is_ephemeral = excluded.is_ephemeral, \
                is_view_once = excluded.is_view_once, \
                quoted_id = COALESCE(excluded.quoted_id, messages.quoted_id), \
                quoted_sender = COALESCE(excluded.quoted_sender, messages.quoted_sender), \
                status = CASE WHEN {new_rank} > {old_rank} THEN excluded.status ELSE messages.status END, \
                raw = COALESCE(messages.raw, excluded.raw)",
            new_rank = status_rank_sql("excluded.status"),
            old_rank = status_rank_sql("messages.status"),
        );
        let mut tx = self.pool.begin().await.map_err(db_err("begin message"))?;
        sqlx::query(&sql)
            .bind(&msg.session_id)
            .bind(&msg.message_id)
            .bind(&msg.chat_jid)
            .bind(&msg.sender_jid)
            .bind(msg.timestamp)
            .bind(&msg.push_name)
            .bind(msg.msg_type.as_str())
            .bind(&msg.media_type)
            .bind(&msg.content)
            .bind(msg.from_me)
            .bind(msg.is_group)
            .bind(msg.is_ephemeral)
            .bind(msg.is_view_once)
            .bind(msg.is_edit)
            .bind(&msg.edit_target_id)
            .bind(&msg.quoted_id)
            .bind(&msg.quoted_sender)
            .bind(msg.status.as_str())
            .bind(&msg.raw)
            .execute(&mut *tx)
            .await
            .map_err(db_err("upsert message"))?;

        if msg.edit_target_id.is_none() {
            sqlx::query(
                "UPDATE messages SET is_edit = 1, content = ( \
                    SELECT e.content FROM messages e \
                    WHERE e.session_id = ? AND e.edit_target_id = ? \
                    ORDER BY e.timestamp DESC LIMIT 1) \
                 WHERE session_id = ? AND message_id = ? AND EXISTS ( \
                    SELECT 1 FROM messages e WHERE e.session_id = ? AND e.edit_target_id = ?)",
            )
            .bind(&msg.session_id)
            .bind(&msg.message_id)
            .bind(&msg.session_id)
            .bind(&msg.message_id)
            .bind(&msg.session_id)
            .bind(&msg.message_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err("apply pending edit"))?;
        }
        tx.commit().await.map_err(db_err("commit message"))?;
        Ok(())
    }

    /// Apply a receipt. Only rows whose status ranks below `status` change.
    /// Returns the number of rows advanced.
    pub async fn apply_receipt(
        &self,
        session_id: &str,
        message_ids: &[String],
        status: MessageStatus,
    ) -> Result<u64, GatewayError> {
        let sql = format!(
            "UPDATE messages SET status = ? \
             WHERE session_id = ? AND message_id = ? AND {} < ?",
            status_rank_sql("status")
        );
        let mut tx = self.pool.begin().await.map_err(db_err("begin receipt"))?;
        let mut advanced = 0;
        for id in message_ids {
            let result = sqlx::query(&sql)
                .bind(status.as_str())
                .bind(session_id)
                .bind(id)
                .bind(status.rank())
                .execute(&mut *tx)
                .await
                .map_err(db_err("apply receipt"))?;
            advanced += result.rows_affected();
        }
        tx.commit().await.map_err(db_err("commit receipt"))?;
        Ok(advanced)
    }

    /// Force a status, bypassing receipt ordering (failed sends).
    pub async fn set_message_status(
        &self,
        session_id: &str,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<(), GatewayError> {
        sqlx::query("UPDATE messages SET status = ? WHERE session_id = ? AND message_id = ?")
            .bind(status.as_str())
            .bind(session_id)
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(db_err("set message status"))?;
        Ok(())
    }

    /// Replace the content of an edited message. Returns whether the target existed.
    pub async fn apply_edit(
        &self,
        session_id: &str,
        target_id: &str,
        text: &str,
    ) -> Result<bool, GatewayError> {
        let result = sqlx::query(
            "UPDATE messages SET content = ?, is_edit = 1 \
             WHERE session_id = ? AND message_id = ?",
        )
        .bind(text)
        .bind(session_id)
        .bind(target_id)
        .execute(&self.pool)
        .await
        .map_err(db_err("apply edit"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_message(
        &self,
        session_id: &str,
        message_id: &str,
    ) -> Result<Option<MessageRecord>, GatewayError> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ? AND message_id = ?"
        ))
        .bind(session_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("get message"))?;
        row.as_ref()
            .map(message_from_row)
            .transpose()
            .map_err(db_err("decode message"))
    }

    /// Messages newest first, optionally narrowed to one chat and paged by timestamp.
    pub async fn list_messages(
        &self,
        session_id: &str,
        query: &MessageQuery,
    ) -> Result<Vec<MessageRecord>, GatewayError> {
        let limit = query.limit.unwrap_or(50).clamp(1, MAX_PAGE);
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE session_id = ? \
               AND (? IS NULL OR chat_jid = ?) \
               AND (? IS NULL OR timestamp < ?) \
             ORDER BY timestamp DESC, message_id DESC \
             LIMIT ?"
        ))
        .bind(session_id)
        .bind(&query.chat)
        .bind(&query.chat)
        .bind(query.before)
        .bind(query.before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list messages"))?;
        rows.iter()
            .map(message_from_row)
            .collect::<Result<_, _>>()
            .map_err(db_err("decode message"))
    }

    pub async fn count_messages(&self, session_id: &str) -> Result<i64, GatewayError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err("count messages"))?;
        Ok(count)
    }
}
