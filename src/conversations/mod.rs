//! Conversation store abstraction.
//!
//! The hub never owns conversation or message persistence; it consults the
//! platform's store through this provider seam. The event router is the
//! only caller — provider calls never happen inside the hub control loop.

use async_trait::async_trait;
use thiserror::Error;

use crate::events::{ConversationId, UserId};

pub mod noop;
pub mod sqlite;

pub use noop::NoOpProvider;
pub use sqlite::SqliteProvider;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait ConversationProvider: Send + Sync {
    /// Whether `user_id` may act on the conversation. Admins may act on
    /// any existing conversation; ordinary users only on their own.
    async fn can_access(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        is_admin: bool,
    ) -> Result<bool, ConversationError>;

    /// The user that owns the conversation, if it exists.
    async fn owner_of(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<UserId>, ConversationError>;

    /// Persist that `user_id` has read the other party's messages in the
    /// conversation. Unread counters are recomputed on the next fetch; the
    /// hub broadcasts nothing for this.
    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ConversationError>;
}
