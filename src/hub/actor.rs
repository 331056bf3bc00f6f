//! The hub control loop.
//!
//! One task owns the `user_id → connection` map and the derived admin
//! subset. Every mutation and every presence query flows through
//! [`HubActor::run`] as a [`HubCommand`], so the maps need no locking and
//! register/unregister/broadcast resolve in one deterministic order.
//! Command handling never awaits: fan-out uses `try_send` and a full or
//! closed recipient queue can only drop that recipient's event, never
//! stall the loop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::events::{ConversationId, ServerEvent, UserId};
use crate::metrics;

use super::types::{BroadcastTarget, ConnectionHandle, HubCommand};

/// Registry state owned by the control loop.
pub(crate) struct HubActor {
    /// At most one addressable connection per user id.
    pub(crate) conns: HashMap<UserId, ConnectionHandle>,
    /// Derived subset: user ids whose registered connection is an admin.
    pub(crate) admins: HashSet<UserId>,
}

impl HubActor {
    pub(crate) fn new() -> Self {
        Self {
            conns: HashMap::new(),
            admins: HashSet::new(),
        }
    }

    /// The control loop. Exits when every `Hub` handle is dropped.
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>) {
        while let Some(command) = rx.recv().await {
            self.handle_command(command);
        }
        debug!("hub control loop stopped");
    }

    pub(crate) fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { handle } => self.handle_register(handle),
            HubCommand::Unregister { conn_id, user_id } => {
                self.handle_unregister(conn_id, user_id);
            }
            HubCommand::Broadcast { target, event } => {
                self.handle_broadcast(&target, &event);
            }
            HubCommand::SetViewing {
                conn_id,
                user_id,
                conversation,
            } => self.handle_set_viewing(conn_id, user_id, conversation),
            HubCommand::IsOnline { user_id, reply_tx } => {
                let _ = reply_tx.send(self.conns.contains_key(&user_id));
            }
            HubCommand::IsViewing {
                user_id,
                conversation_id,
                reply_tx,
            } => {
                let viewing = self
                    .conns
                    .get(&user_id)
                    .is_some_and(|h| h.viewing == Some(conversation_id));
                let _ = reply_tx.send(viewing);
            }
        }
    }

    /// Insert or overwrite the user's registry entry. Dropping a replaced
    /// entry drops the only sender for its queue, so the old write loop
    /// drains, sends a Close frame, and exits on its own.
    fn handle_register(&mut self, handle: ConnectionHandle) {
        let user_id = handle.user_id;
        let is_admin = handle.is_admin();
        let fresh = !self.conns.contains_key(&user_id);

        debug!(
            user_id,
            conn_id = %handle.conn_id,
            admin = is_admin,
            replaced = !fresh,
            "connection registered"
        );

        self.conns.insert(user_id, handle);
        if is_admin {
            self.admins.insert(user_id);
        } else {
            self.admins.remove(&user_id);
        }

        if fresh {
            metrics::inc_connected_users();
            // Presence is for the support desk: admins coming online is
            // not announced.
            if !is_admin {
                self.handle_broadcast(&BroadcastTarget::Admins, &ServerEvent::user_online(user_id));
            }
        }
        metrics::set_connected_admins(self.admins.len());
    }

    /// Remove the user's entry only if it is still this exact connection;
    /// a stale unregister from a connection that has already been replaced
    /// must not evict its successor. Idempotent.
    fn handle_unregister(&mut self, conn_id: Uuid, user_id: UserId) {
        let current = match self.conns.get(&user_id) {
            Some(handle) if handle.conn_id == conn_id => handle,
            _ => {
                debug!(user_id, conn_id = %conn_id, "stale or repeated unregister ignored");
                return;
            }
        };
        let was_admin = current.is_admin();

        self.conns.remove(&user_id);
        self.admins.remove(&user_id);

        debug!(user_id, conn_id = %conn_id, "connection unregistered");
        metrics::dec_connected_users();
        metrics::set_connected_admins(self.admins.len());

        if !was_admin {
            self.handle_broadcast(&BroadcastTarget::Admins, &ServerEvent::user_offline(user_id));
        }
    }

    /// Serialize once, then attempt a non-blocking enqueue per recipient.
    fn handle_broadcast(&self, target: &BroadcastTarget, event: &ServerEvent) {
        let frame: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                error!(kind = event.kind.as_str(), error = %e, "event serialization failed");
                return;
            }
        };

        let mut enqueued = 0usize;
        match target {
            BroadcastTarget::Users(user_ids) => {
                for user_id in user_ids {
                    if let Some(handle) = self.conns.get(user_id)
                        && Self::deliver(handle, &frame)
                    {
                        enqueued += 1;
                    }
                }
            }
            BroadcastTarget::Admins => {
                for user_id in &self.admins {
                    if let Some(handle) = self.conns.get(user_id)
                        && Self::deliver(handle, &frame)
                    {
                        enqueued += 1;
                    }
                }
            }
        }

        metrics::record_fanout(enqueued);
    }

    /// Never blocks: a full queue drops the event for that recipient only.
    /// The event is reflected in persisted state and becomes visible on
    /// the recipient's next poll or reconnect.
    fn deliver(handle: &ConnectionHandle, frame: &Arc<str>) -> bool {
        match handle.sender.try_send(Arc::clone(frame)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::inc_events_dropped();
                warn!(
                    user_id = handle.user_id,
                    conn_id = %handle.conn_id,
                    "outbound queue full; event dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Write loop already gone; the unregister is in flight.
                debug!(
                    user_id = handle.user_id,
                    conn_id = %handle.conn_id,
                    "outbound queue closed; event discarded"
                );
                false
            }
        }
    }

    /// Guarded like unregister: a replaced connection's router task must
    /// not scribble on its successor's hint.
    fn handle_set_viewing(
        &mut self,
        conn_id: Uuid,
        user_id: UserId,
        conversation: Option<ConversationId>,
    ) {
        if let Some(handle) = self.conns.get_mut(&user_id)
            && handle.conn_id == conn_id
        {
            handle.viewing = conversation;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::events::EventKind;
    use tokio::sync::oneshot;

    fn handle_with_queue(
        user_id: UserId,
        role: Role,
        capacity: usize,
    ) -> (ConnectionHandle, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            ConnectionHandle::new(Uuid::new_v4(), user_id, role, tx),
            rx,
        )
    }

    fn recv_kind(rx: &mut mpsc::Receiver<Arc<str>>) -> EventKind {
        let frame = rx.try_recv().expect("expected a queued frame");
        serde_json::from_str::<ServerEvent>(&frame).unwrap().kind
    }

    #[tokio::test]
    async fn register_replaces_and_closes_previous_queue() {
        let mut actor = HubActor::new();
        let (conn_a, mut rx_a) = handle_with_queue(1, Role::User, 4);
        let (conn_b, _rx_b) = handle_with_queue(1, Role::User, 4);
        let id_b = conn_b.conn_id;

        actor.handle_command(HubCommand::Register { handle: conn_a });
        actor.handle_command(HubCommand::Register { handle: conn_b });

        assert_eq!(actor.conns.get(&1).unwrap().conn_id, id_b);
        // The replaced entry's sender was dropped with it.
        assert_eq!(rx_a.recv().await, None);
    }

    #[tokio::test]
    async fn admin_subset_matches_main_map_and_role() {
        let mut actor = HubActor::new();
        let (admin, _rx1) = handle_with_queue(1, Role::Admin, 4);
        let (user, _rx2) = handle_with_queue(2, Role::User, 4);

        actor.handle_command(HubCommand::Register { handle: admin });
        actor.handle_command(HubCommand::Register { handle: user });

        assert!(actor.admins.contains(&1));
        assert!(!actor.admins.contains(&2));

        // Re-registering user 1 with an ordinary-role token drops it from
        // the subset.
        let (demoted, _rx3) = handle_with_queue(1, Role::User, 4);
        actor.handle_command(HubCommand::Register { handle: demoted });
        assert!(actor.admins.is_empty());
        assert!(actor.conns.contains_key(&1));
    }

    #[tokio::test]
    async fn stale_unregister_keeps_the_replacement() {
        let mut actor = HubActor::new();
        let (conn_a, _rx_a) = handle_with_queue(1, Role::User, 4);
        let (conn_b, _rx_b) = handle_with_queue(1, Role::User, 4);
        let id_a = conn_a.conn_id;
        let id_b = conn_b.conn_id;

        actor.handle_command(HubCommand::Register { handle: conn_a });
        actor.handle_command(HubCommand::Register { handle: conn_b });
        actor.handle_command(HubCommand::Unregister {
            conn_id: id_a,
            user_id: 1,
        });

        assert_eq!(actor.conns.get(&1).unwrap().conn_id, id_b);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let mut actor = HubActor::new();
        let (conn, _rx) = handle_with_queue(1, Role::Admin, 4);
        let conn_id = conn.conn_id;

        actor.handle_command(HubCommand::Register { handle: conn });
        actor.handle_command(HubCommand::Unregister { conn_id, user_id: 1 });
        actor.handle_command(HubCommand::Unregister { conn_id, user_id: 1 });
        actor.handle_command(HubCommand::Unregister {
            conn_id: Uuid::new_v4(),
            user_id: 99,
        });

        assert!(actor.conns.is_empty());
        assert!(actor.admins.is_empty());
    }

    #[tokio::test]
    async fn broadcast_skips_offline_users() {
        let mut actor = HubActor::new();
        let (conn, mut rx) = handle_with_queue(1, Role::User, 4);
        actor.handle_command(HubCommand::Register { handle: conn });

        actor.handle_command(HubCommand::Broadcast {
            target: BroadcastTarget::Users(vec![1, 2, 3]),
            event: ServerEvent::conversation_update(7),
        });

        assert_eq!(recv_kind(&mut rx), EventKind::ConversationUpdate);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_for_that_recipient_only() {
        let mut actor = HubActor::new();
        let (slow, mut slow_rx) = handle_with_queue(1, Role::User, 1);
        let (healthy, mut healthy_rx) = handle_with_queue(2, Role::User, 4);
        actor.handle_command(HubCommand::Register { handle: slow });
        actor.handle_command(HubCommand::Register { handle: healthy });

        // Fill the slow recipient's queue to capacity.
        actor.handle_command(HubCommand::Broadcast {
            target: BroadcastTarget::Users(vec![1]),
            event: ServerEvent::conversation_update(1),
        });
        // Second broadcast: dropped for the slow one, delivered to the
        // healthy one, and the control loop never waits.
        actor.handle_command(HubCommand::Broadcast {
            target: BroadcastTarget::Users(vec![1, 2]),
            event: ServerEvent::conversation_update(2),
        });

        assert_eq!(recv_kind(&mut healthy_rx), EventKind::ConversationUpdate);
        assert_eq!(recv_kind(&mut slow_rx), EventKind::ConversationUpdate);
        assert!(slow_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fresh_user_registration_announces_presence_to_admins() {
        let mut actor = HubActor::new();
        let (admin, mut admin_rx) = handle_with_queue(1, Role::Admin, 8);
        actor.handle_command(HubCommand::Register { handle: admin });

        let (user_a, _rx_a) = handle_with_queue(2, Role::User, 4);
        actor.handle_command(HubCommand::Register { handle: user_a });
        assert_eq!(recv_kind(&mut admin_rx), EventKind::UserOnline);

        // Replacement is not a presence change.
        let (user_b, _rx_b) = handle_with_queue(2, Role::User, 4);
        let id_b = user_b.conn_id;
        actor.handle_command(HubCommand::Register { handle: user_b });
        assert!(admin_rx.try_recv().is_err());

        actor.handle_command(HubCommand::Unregister {
            conn_id: id_b,
            user_id: 2,
        });
        assert_eq!(recv_kind(&mut admin_rx), EventKind::UserOffline);
    }

    #[tokio::test]
    async fn presence_queries_answer_through_the_loop() {
        let mut actor = HubActor::new();
        let (conn, _rx) = handle_with_queue(1, Role::User, 4);
        let conn_id = conn.conn_id;
        actor.handle_command(HubCommand::Register { handle: conn });

        let (tx, rx) = oneshot::channel();
        actor.handle_command(HubCommand::IsOnline {
            user_id: 1,
            reply_tx: tx,
        });
        assert!(rx.await.unwrap());

        let (tx, rx) = oneshot::channel();
        actor.handle_command(HubCommand::IsViewing {
            user_id: 1,
            conversation_id: 5,
            reply_tx: tx,
        });
        assert!(!rx.await.unwrap());

        actor.handle_command(HubCommand::SetViewing {
            conn_id,
            user_id: 1,
            conversation: Some(5),
        });
        let (tx, rx) = oneshot::channel();
        actor.handle_command(HubCommand::IsViewing {
            user_id: 1,
            conversation_id: 5,
            reply_tx: tx,
        });
        assert!(rx.await.unwrap());

        // A stale conn id must not update the hint.
        actor.handle_command(HubCommand::SetViewing {
            conn_id: Uuid::new_v4(),
            user_id: 1,
            conversation: None,
        });
        assert_eq!(actor.conns.get(&1).unwrap().viewing, Some(5));
    }
}
