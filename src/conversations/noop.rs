//! No-op conversation provider.
//!
//! Used when no database is configured. Nothing is accessible and nothing
//! is persisted, so typing and read events from clients are dropped at the
//! access check while the hub's push API keeps working (callers supply the
//! conversation owner themselves).

use async_trait::async_trait;

use super::{ConversationError, ConversationProvider};
use crate::events::{ConversationId, UserId};

pub struct NoOpProvider;

#[async_trait]
impl ConversationProvider for NoOpProvider {
    async fn can_access(
        &self,
        _conversation_id: ConversationId,
        _user_id: UserId,
        _is_admin: bool,
    ) -> Result<bool, ConversationError> {
        Ok(false)
    }

    async fn owner_of(
        &self,
        _conversation_id: ConversationId,
    ) -> Result<Option<UserId>, ConversationError> {
        Ok(None)
    }

    async fn mark_read(
        &self,
        _conversation_id: ConversationId,
        _user_id: UserId,
    ) -> Result<(), ConversationError> {
        Ok(())
    }
}
