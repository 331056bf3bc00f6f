//! SQLite-backed conversation provider.
//!
//! Reads the platform's `conversations` and `messages` tables through a
//! small pool. The schema is ensured on connect so a fresh deployment (or
//! a test fixture) starts clean; on an existing platform database the
//! statements are no-ops.

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::time::Duration;
use tracing::info;

use super::{ConversationError, ConversationProvider};
use crate::events::{ConversationId, UserId};

/// Provider over the platform's SQLite database.
#[derive(Clone)]
pub struct SqliteProvider {
    pool: SqlitePool,
}

impl SqliteProvider {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Open the database, ensuring the schema exists.
    pub async fn connect(path: &str) -> Result<Self, ConversationError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .test_before_acquire(true)
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;

        Self::ensure_schema(&pool).await?;

        info!(path = %path, "Conversation store connected");
        Ok(Self { pool })
    }

    async fn ensure_schema(pool: &SqlitePool) -> Result<(), ConversationError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                subject TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL
                    REFERENCES conversations(id) ON DELETE CASCADE,
                sender_id INTEGER NOT NULL,
                body TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ConversationProvider for SqliteProvider {
    async fn can_access(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        is_admin: bool,
    ) -> Result<bool, ConversationError> {
        let owner: Option<UserId> =
            sqlx::query_scalar("SELECT user_id FROM conversations WHERE id = ?1")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match owner {
            Some(owner) => is_admin || owner == user_id,
            None => false,
        })
    }

    async fn owner_of(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<UserId>, ConversationError> {
        let owner = sqlx::query_scalar("SELECT user_id FROM conversations WHERE id = ?1")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(owner)
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ConversationError> {
        sqlx::query(
            "UPDATE messages SET is_read = 1
             WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
