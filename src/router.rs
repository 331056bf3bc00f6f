//! Event router: inbound client events to hub broadcasts.
//!
//! This is the routing policy of the system. The other party of a
//! support conversation depends on who is acting: an ordinary user's
//! activity is visible to the admin team, an admin's activity is visible
//! to the conversation's owning user. Read receipts are persisted and
//! never broadcast - the other side recomputes unread counts on its next
//! fetch.

use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::Role;
use crate::conversations::ConversationProvider;
use crate::events::{ClientEvent, ConversationId, ServerEvent, UserId};
use crate::hub::{BroadcastTarget, Hub};
use crate::metrics;

/// Identity of the connection an event arrived on.
#[derive(Debug, Clone, Copy)]
pub struct Sender {
    pub conn_id: Uuid,
    pub user_id: UserId,
    pub role: Role,
}

/// Routes events from connection read loops into the hub and the
/// conversation store.
#[derive(Clone)]
pub struct EventRouter {
    hub: Hub,
    conversations: Arc<dyn ConversationProvider>,
}

impl EventRouter {
    pub fn new(hub: Hub, conversations: Arc<dyn ConversationProvider>) -> Self {
        Self { hub, conversations }
    }

    /// Dispatch one decoded client event. Failures are logged and
    /// swallowed: nothing a client sends here may take its connection
    /// down or propagate an error to the read loop.
    pub async fn dispatch(&self, sender: Sender, event: ClientEvent) {
        metrics::record_client_event(event.as_str());

        match event {
            ClientEvent::Typing { conversation_id } => {
                self.relay_typing(sender, conversation_id, true).await;
            }
            ClientEvent::StopTyping { conversation_id } => {
                self.relay_typing(sender, conversation_id, false).await;
            }
            ClientEvent::MessageRead { conversation_id } => {
                self.persist_read(sender, conversation_id).await;
            }
        }
    }

    /// Typing indicators follow the same sender-role targeting as new
    /// messages: user activity goes to the admin team, admin activity
    /// goes to the conversation owner.
    async fn relay_typing(&self, sender: Sender, conversation_id: ConversationId, start: bool) {
        if !self.check_access(sender, conversation_id).await {
            return;
        }
        // Typing in a conversation is the strongest hint that it is the
        // one on screen.
        self.hub
            .set_viewing(sender.conn_id, sender.user_id, Some(conversation_id))
            .await;

        let target = match self.other_party(sender, conversation_id).await {
            Some(target) => target,
            None => return,
        };
        let event = if start {
            ServerEvent::typing(conversation_id, sender.user_id)
        } else {
            ServerEvent::stop_typing(conversation_id, sender.user_id)
        };
        self.hub.broadcast(target, event).await;
    }

    /// Read receipts only touch persisted state; the sender already
    /// knows, and the other party sees updated unread counts on fetch.
    async fn persist_read(&self, sender: Sender, conversation_id: ConversationId) {
        if !self.check_access(sender, conversation_id).await {
            return;
        }
        self.hub
            .set_viewing(sender.conn_id, sender.user_id, Some(conversation_id))
            .await;

        if let Err(e) = self
            .conversations
            .mark_read(conversation_id, sender.user_id)
            .await
        {
            warn!(
                user_id = sender.user_id,
                conversation_id,
                error = %e,
                "failed to persist read state"
            );
        }
    }

    async fn check_access(&self, sender: Sender, conversation_id: ConversationId) -> bool {
        match self
            .conversations
            .can_access(conversation_id, sender.user_id, sender.role.is_admin())
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                debug!(
                    user_id = sender.user_id,
                    conversation_id, "event for inaccessible conversation ignored"
                );
                false
            }
            Err(e) => {
                warn!(
                    user_id = sender.user_id,
                    conversation_id,
                    error = %e,
                    "conversation access check failed; event ignored"
                );
                false
            }
        }
    }

    async fn other_party(
        &self,
        sender: Sender,
        conversation_id: ConversationId,
    ) -> Option<BroadcastTarget> {
        if !sender.role.is_admin() {
            return Some(BroadcastTarget::Admins);
        }
        match self.conversations.owner_of(conversation_id).await {
            Ok(Some(owner)) => Some(BroadcastTarget::Users(vec![owner])),
            Ok(None) => {
                debug!(conversation_id, "conversation has no owner; nothing to relay");
                None
            }
            Err(e) => {
                warn!(conversation_id, error = %e, "owner lookup failed; nothing relayed");
                None
            }
        }
    }
}
