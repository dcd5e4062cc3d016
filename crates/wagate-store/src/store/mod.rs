//! SQLite-backed gateway store.
//!
//! Split into focused submodules:
//! - `sessions`: session rows and status transitions
//! - `messages`: message upsert, receipts, history queries
//! - `media`: media rows, pending-download scans, download outcomes
//! - `webhooks`: webhook subscription CRUD
//! - `chats`: chat metadata from history sync and chat-state events

mod chats;
mod media;
mod messages;
mod sessions;
mod webhooks;

pub use chats::ChatFlag;
pub use messages::MessageQuery;
pub use webhooks::WebhookUpdate;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;
use wagate_core::{config::Config, error::GatewayError};

/// Persistent gateway store backed by SQLite.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open the configured database, running migrations on first use.
    pub async fn new(config: &Config) -> Result<Self, GatewayError> {
        let url = config.database_url();
        if let Some(path) = url.strip_prefix("sqlite:") {
            if !path.starts_with(':') {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        GatewayError::Database(format!("failed to create data dir: {e}"))
                    })?;
                }
            }
        }
        let store = Self::connect(&url, config.database.max_connections).await?;
        info!("Store initialized at {url}");
        Ok(store)
    }

    /// Open a pool on an explicit URL and migrate it.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, GatewayError> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| GatewayError::Database(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await
            .map_err(|e| GatewayError::Database(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// A private in-memory database. A single connection keeps every query on the same database.
    pub async fn in_memory() -> Result<Self, GatewayError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| GatewayError::Database(format!("invalid database url: {e}")))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| GatewayError::Database(format!("failed to open sqlite: {e}")))?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Liveness check: one trivial query.
    pub async fn ping(&self) -> Result<(), GatewayError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err("ping"))?;
        Ok(())
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), GatewayError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| GatewayError::Database(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] = &[
            ("001_init", include_str!("../../migrations/001_init.sql")),
            ("002_media", include_str!("../../migrations/002_media.sql")),
            (
                "003_webhooks",
                include_str!("../../migrations/003_webhooks.sql"),
            ),
            ("004_chats", include_str!("../../migrations/004_chats.sql")),
            ("005_edits", include_str!("../../migrations/005_edits.sql")),
        ];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        GatewayError::Database(format!("failed to check migration {name}: {e}"))
                    })?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(|e| GatewayError::Database(format!("migration {name} failed: {e}")))?;

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| {
                    GatewayError::Database(format!("failed to record migration {name}: {e}"))
                })?;
        }
        Ok(())
    }
}

/// Wrap a sqlx error with the failing operation.
pub(crate) fn db_err(op: &'static str) -> impl FnOnce(sqlx::Error) -> GatewayError {
    move |e| GatewayError::Database(format!("{op} failed: {e}"))
}

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Timestamps are written by [`now`]; anything unparseable reads back as the epoch.
pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

/// SQL expression ranking a status column in receipt order.
pub(crate) fn status_rank_sql(column: &str) -> String {
    format!(
        "CASE {column} WHEN 'sent' THEN 1 WHEN 'delivered' THEN 2 \
         WHEN 'read' THEN 3 WHEN 'played' THEN 4 ELSE 0 END"
    )
}
