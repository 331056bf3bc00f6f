//! Hub command and registry entry types.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::auth::Role;
use crate::events::{ConversationId, ServerEvent, UserId};

/// Sender half of a connection's bounded outbound queue. Frames are
/// encoded once per broadcast and shared across recipients; only the hub
/// control loop enqueues, only the owning write loop drains.
pub type OutboundSender = mpsc::Sender<Arc<str>>;

/// The registry's view of one live connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Fresh per physical link; disambiguates a connection from its
    /// replacement under the same user id.
    pub conn_id: Uuid,
    pub user_id: UserId,
    pub role: Role,
    pub sender: OutboundSender,
    /// Soft hint: the conversation the client currently has open.
    /// Not authoritative; refreshed by typing and read events.
    pub viewing: Option<ConversationId>,
}

impl ConnectionHandle {
    pub fn new(conn_id: Uuid, user_id: UserId, role: Role, sender: OutboundSender) -> Self {
        Self {
            conn_id,
            user_id,
            role,
            sender,
            viewing: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Who a broadcast is for. The two forms are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastTarget {
    /// A specific set of user ids; offline ids are skipped.
    Users(Vec<UserId>),
    /// Every currently registered admin connection.
    Admins,
}

/// Commands processed strictly one at a time by the hub control loop.
///
/// This total ordering is what lets the loop own plain maps: an
/// unregister racing a broadcast for the same user resolves to whichever
/// command entered the channel first.
#[derive(Debug)]
pub enum HubCommand {
    Register {
        handle: ConnectionHandle,
    },
    Unregister {
        conn_id: Uuid,
        user_id: UserId,
    },
    Broadcast {
        target: BroadcastTarget,
        event: ServerEvent,
    },
    SetViewing {
        conn_id: Uuid,
        user_id: UserId,
        conversation: Option<ConversationId>,
    },
    IsOnline {
        user_id: UserId,
        reply_tx: oneshot::Sender<bool>,
    },
    IsViewing {
        user_id: UserId,
        conversation_id: ConversationId,
        reply_tx: oneshot::Sender<bool>,
    },
}
