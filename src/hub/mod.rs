//! The Hub - registry of live connections and fan-out point.
//!
//! # Architecture
//!
//! - **State ownership**: one [`actor::HubActor`] task owns the
//!   `user_id → connection` map and the derived admin subset.
//! - **Message passing**: every operation - register, unregister,
//!   broadcast, presence query - is a [`HubCommand`] on one channel, so
//!   all of them observe a single total order.
//! - **Handles**: [`Hub`] is a cheap clonable handle. One is constructed
//!   at process start and injected into the gateway, the event router,
//!   and the platform's message-send path; it lives for the process
//!   lifetime with no explicit teardown.

mod actor;
mod types;

pub use types::{BroadcastTarget, ConnectionHandle, HubCommand, OutboundSender};

use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use uuid::Uuid;

use crate::events::{ConversationId, MessagePayload, ServerEvent, UserId};

/// Control channel depth. Commands are handled without awaiting, so this
/// only needs to absorb bursts of concurrent registrations and broadcasts.
const CONTROL_QUEUE: usize = 256;

/// Handle to the hub control loop.
#[derive(Debug, Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Spawn the control loop and return a handle to it.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(CONTROL_QUEUE);
        tokio::spawn(actor::HubActor::new().run(rx));
        Self { tx }
    }

    async fn send(&self, command: HubCommand) {
        if self.tx.send(command).await.is_err() {
            // Only reachable during process shutdown.
            warn!("hub control loop is gone; command discarded");
        }
    }

    /// Make `handle` the addressable connection for its user id,
    /// replacing (and thereby closing the queue of) any previous one.
    pub async fn register(&self, handle: ConnectionHandle) {
        self.send(HubCommand::Register { handle }).await;
    }

    /// Remove the connection if it is still the registered one for
    /// `user_id`. Safe to call repeatedly and after replacement.
    pub async fn unregister(&self, conn_id: Uuid, user_id: UserId) {
        self.send(HubCommand::Unregister { conn_id, user_id }).await;
    }

    /// Deliver `event` to the target set. Never blocks on any recipient;
    /// a full queue drops the event for that recipient only.
    pub async fn broadcast(&self, target: BroadcastTarget, event: ServerEvent) {
        self.send(HubCommand::Broadcast { target, event }).await;
    }

    /// Refresh the connection's "currently viewing" hint.
    pub async fn set_viewing(
        &self,
        conn_id: Uuid,
        user_id: UserId,
        conversation: Option<ConversationId>,
    ) {
        self.send(HubCommand::SetViewing {
            conn_id,
            user_id,
            conversation,
        })
        .await;
    }

    /// Presence check for collaborators (e.g., to suppress a push
    /// notification when the recipient is already live).
    pub async fn is_online(&self, user_id: UserId) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(HubCommand::IsOnline { user_id, reply_tx }).await;
        reply_rx.await.unwrap_or(false)
    }

    /// Presence refinement: whether the user's live connection currently
    /// has this conversation open.
    pub async fn is_viewing(&self, user_id: UserId, conversation_id: ConversationId) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(HubCommand::IsViewing {
            user_id,
            conversation_id,
            reply_tx,
        })
        .await;
        reply_rx.await.unwrap_or(false)
    }

    /// Push a freshly persisted message to the party that has not seen
    /// it: an ordinary sender's message goes to every connected admin, an
    /// admin's reply goes to the conversation's owning user. Called by
    /// the platform's message-send path immediately after persistence; a
    /// crash between the two steps costs only the live push.
    pub async fn broadcast_new_message(
        &self,
        message: MessagePayload,
        conversation_owner: UserId,
        sender_is_admin: bool,
    ) {
        let target = if sender_is_admin {
            BroadcastTarget::Users(vec![conversation_owner])
        } else {
            BroadcastTarget::Admins
        };
        self.broadcast(target, ServerEvent::new_message(message))
            .await;
    }

    /// Notify both sides of a conversation that its metadata changed
    /// (subject, status, assignment).
    pub async fn broadcast_conversation_update(
        &self,
        conversation_id: ConversationId,
        conversation_owner: UserId,
    ) {
        self.broadcast(
            BroadcastTarget::Users(vec![conversation_owner]),
            ServerEvent::conversation_update(conversation_id),
        )
        .await;
        self.broadcast(
            BroadcastTarget::Admins,
            ServerEvent::conversation_update(conversation_id),
        )
        .await;
    }
}
