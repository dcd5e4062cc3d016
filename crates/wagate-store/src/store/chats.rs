//! Chat metadata.

use super::{db_err, now, Store};
use sqlx::Row;
use wagate_core::{error::GatewayError, records::ChatRecord};

const CHAT_COLUMNS: &str = "session_id, jid, name, unread_count, unread_mention_count, \
     ephemeral_expiration, read_only, locked, suspended, archived, pinned, muted_until, \
     last_message_at";

fn chat_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ChatRecord, sqlx::Error> {
    Ok(ChatRecord {
        session_id: row.try_get("session_id")?,
        jid: row.try_get("jid")?,
        name: row.try_get("name")?,
        unread_count: row.try_get("unread_count")?,
        unread_mention_count: row.try_get("unread_mention_count")?,
        ephemeral_expiration: row.try_get("ephemeral_expiration")?,
        read_only: row.try_get("read_only")?,
        locked: row.try_get("locked")?,
        suspended: row.try_get("suspended")?,
        archived: row.try_get("archived")?,
        pinned: row.try_get("pinned")?,
        muted_until: row.try_get("muted_until")?,
        last_message_at: row.try_get("last_message_at")?,
    })
}

/// Single-column chat flags that chat-state events toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatFlag {
    Archived,
    Pinned,
}

impl ChatFlag {
    fn column(&self) -> &'static str {
        match self {
            Self::Archived => "archived",
            Self::Pinned => "pinned",
        }
    }
}

impl Store {
    /// Insert or replace a chat snapshot from history sync.
    ///
    /// The last-activity timestamp never moves backwards and an existing name
    /// survives a snapshot without one.
    pub async fn upsert_chat(&self, chat: &ChatRecord) -> Result<(), GatewayError> {
        sqlx::query(&format!(
            "INSERT INTO chats ({CHAT_COLUMNS}, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(session_id, jid) DO UPDATE SET \
                name = COALESCE(excluded.name, chats.name), \
                unread_count = excluded.unread_count, \
                unread_mention_count = excluded.unread_mention_count, \
                ephemeral_expiration = excluded.ephemeral_expiration, \
                read_only = excluded.read_only, \
                locked = excluded.locked, \
                suspended = excluded.suspended, \
                archived = excluded.archived, \
                pinned = excluded.pinned, \
                muted_until = excluded.muted_until, \
                last_message_at = MAX(chats.last_message_at, excluded.last_message_at), \
                updated_at = excluded.updated_at"
        ))
        .bind(&chat.session_id)
        .bind(&chat.jid)
        .bind(&chat.name)
        .bind(chat.unread_count)
        .bind(chat.unread_mention_count)
        .bind(chat.ephemeral_expiration)
        .bind(chat.read_only)
        .bind(chat.locked)
        .bind(chat.suspended)
        .bind(chat.archived)
        .bind(chat.pinned)
        .bind(chat.muted_until)
        .bind(chat.last_message_at)
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(db_err("upsert chat"))?;
        Ok(())
    }

    /// Make sure a row exists so single-field updates have something to hit.
    async fn ensure_chat(&self, session_id: &str, jid: &str) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT OR IGNORE INTO chats (session_id, jid, updated_at) VALUES (?, ?, ?)",
        )
        .bind(session_id)
        .bind(jid)
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(db_err("ensure chat"))?;
        Ok(())
    }

    pub async fn set_chat_flag(
        &self,
        session_id: &str,
        jid: &str,
        flag: ChatFlag,
        value: bool,
    ) -> Result<(), GatewayError> {
        self.ensure_chat(session_id, jid).await?;
        sqlx::query(&format!(
            "UPDATE chats SET {} = ?, updated_at = ? WHERE session_id = ? AND jid = ?",
            flag.column()
        ))
        .bind(value)
        .bind(now())
        .bind(session_id)
        .bind(jid)
        .execute(&self.pool)
        .await
        .map_err(db_err("set chat flag"))?;
        Ok(())
    }

    /// `muted_until = 0` unmutes.
    pub async fn set_chat_muted(
        &self,
        session_id: &str,
        jid: &str,
        muted_until: i64,
    ) -> Result<(), GatewayError> {
        self.ensure_chat(session_id, jid).await?;
        sqlx::query(
            "UPDATE chats SET muted_until = ?, updated_at = ? WHERE session_id = ? AND jid = ?",
        )
        .bind(muted_until)
        .bind(now())
        .bind(session_id)
        .bind(jid)
        .execute(&self.pool)
        .await
        .map_err(db_err("set chat muted"))?;
        Ok(())
    }

    /// Reading a chat zeroes its unread counters; marking unread sets one pending message.
    pub async fn set_chat_read(
        &self,
        session_id: &str,
        jid: &str,
        read: bool,
    ) -> Result<(), GatewayError> {
        self.ensure_chat(session_id, jid).await?;
        let unread = if read { 0 } else { 1 };
        sqlx::query(
            "UPDATE chats SET unread_count = ?, unread_mention_count = 0, updated_at = ? \
             WHERE session_id = ? AND jid = ?",
        )
        .bind(unread)
        .bind(now())
        .bind(session_id)
        .bind(jid)
        .execute(&self.pool)
        .await
        .map_err(db_err("set chat read"))?;
        Ok(())
    }

    /// Bump the last-activity timestamp when a message arrives.
    pub async fn touch_chat(
        &self,
        session_id: &str,
        jid: &str,
        timestamp: i64,
    ) -> Result<(), GatewayError> {
        self.ensure_chat(session_id, jid).await?;
        sqlx::query(
            "UPDATE chats SET last_message_at = MAX(last_message_at, ?), updated_at = ? \
             WHERE session_id = ? AND jid = ?",
        )
        .bind(timestamp)
        .bind(now())
        .bind(session_id)
        .bind(jid)
        .execute(&self.pool)
        .await
        .map_err(db_err("touch chat"))?;
        Ok(())
    }

    pub async fn delete_chat(&self, session_id: &str, jid: &str) -> Result<(), GatewayError> {
        sqlx::query("DELETE FROM chats WHERE session_id = ? AND jid = ?")
            .bind(session_id)
            .bind(jid)
            .execute(&self.pool)
            .await
            .map_err(db_err("delete chat"))?;
        Ok(())
    }

    /// Chats with the most recent activity first; pinned chats lead.
    pub async fn list_chats(&self, session_id: &str) -> Result<Vec<ChatRecord>, GatewayError> {
        let rows = sqlx::query(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats WHERE session_id = ? \
             ORDER BY pinned DESC, last_message_at DESC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list chats"))?;
        rows.iter()
            .map(chat_from_row)
            .collect::<Result<_, _>>()
            .map_err(db_err("decode chat"))
    }
}
