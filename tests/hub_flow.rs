//! Hub lifecycle and fan-out behavior through the public API.
//!
//! Connections are simulated with bare queues: what reaches a receiver
//! here is exactly what a write loop would have flushed to its socket.

use std::sync::Arc;
use std::time::Duration;

use agorad::auth::Role;
use agorad::events::{EventKind, MessagePayload, ServerEvent, UserId};
use agorad::hub::{BroadcastTarget, ConnectionHandle, Hub};
use tokio::sync::mpsc;
use uuid::Uuid;

async fn connect(
    hub: &Hub,
    user_id: UserId,
    role: Role,
    capacity: usize,
) -> (Uuid, mpsc::Receiver<Arc<str>>) {
    let (tx, rx) = mpsc::channel(capacity);
    let conn_id = Uuid::new_v4();
    hub.register(ConnectionHandle::new(conn_id, user_id, role, tx))
        .await;
    (conn_id, rx)
}

async fn next_event(rx: &mut mpsc::Receiver<Arc<str>>) -> ServerEvent {
    let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("queue closed");
    serde_json::from_str(&frame).unwrap()
}

fn drain(rx: &mut mpsc::Receiver<Arc<str>>) {
    while rx.try_recv().is_ok() {}
}

fn message(id: i64, conversation_id: i64, sender_id: UserId) -> MessagePayload {
    MessagePayload {
        id,
        conversation_id,
        sender_id,
        body: format!("message {id}"),
        created_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn most_recent_registration_wins() {
    let hub = Hub::spawn();

    let (first, mut first_rx) = connect(&hub, 10, Role::User, 4).await;
    let (second, _second_rx) = connect(&hub, 10, Role::User, 4).await;

    // The replaced connection's queue is closed by the hub.
    assert_eq!(first_rx.recv().await, None);
    assert!(hub.is_online(10).await);

    // The stale connection's unregister must not evict its replacement.
    hub.unregister(first, 10).await;
    assert!(hub.is_online(10).await);

    hub.unregister(second, 10).await;
    assert!(!hub.is_online(10).await);
}

#[tokio::test]
async fn support_chat_end_to_end() {
    let hub = Hub::spawn();

    let (_u, mut u_rx) = connect(&hub, 10, Role::User, 8).await;
    let (_a1, mut a1_rx) = connect(&hub, 98, Role::Admin, 8).await;
    let (_a2, mut a2_rx) = connect(&hub, 99, Role::Admin, 8).await;
    drain(&mut a1_rx);
    drain(&mut a2_rx);

    // User 10 sends a message in conversation 7: exactly one event per
    // admin, none echoed back to the user.
    hub.broadcast_new_message(message(1, 7, 10), 10, false).await;

    for rx in [&mut a1_rx, &mut a2_rx] {
        let event = next_event(rx).await;
        assert_eq!(event.kind, EventKind::NewMessage);
        assert_eq!(event.conversation_id, Some(7));
        assert!(rx.try_recv().is_err());
    }
    assert!(u_rx.try_recv().is_err());

    // Admin 98 replies: exactly one event for the owning user, nothing
    // for the other admin.
    hub.broadcast_new_message(message(2, 7, 98), 10, true).await;

    let event = next_event(&mut u_rx).await;
    assert_eq!(event.kind, EventKind::NewMessage);
    assert_eq!(event.message.unwrap().sender_id, 98);
    assert!(u_rx.try_recv().is_err());
    assert!(a1_rx.try_recv().is_err());
    assert!(a2_rx.try_recv().is_err());
}

#[tokio::test]
async fn broadcast_returns_even_when_a_queue_is_full() {
    let hub = Hub::spawn();

    let (_slow, mut slow_rx) = connect(&hub, 1, Role::User, 1).await;
    let (_healthy, mut healthy_rx) = connect(&hub, 2, Role::User, 4).await;

    hub.broadcast(
        BroadcastTarget::Users(vec![1]),
        ServerEvent::conversation_update(1),
    )
    .await;

    // The slow queue is now at capacity. Broadcasting to both must
    // neither wait for it nor affect the healthy recipient.
    tokio::time::timeout(Duration::from_secs(1), async {
        hub.broadcast(
            BroadcastTarget::Users(vec![1, 2]),
            ServerEvent::conversation_update(2),
        )
        .await;
    })
    .await
    .expect("broadcast must not block on a full queue");

    assert_eq!(
        next_event(&mut healthy_rx).await.conversation_id,
        Some(2)
    );
    // The slow recipient still holds only the first event.
    assert_eq!(next_event(&mut slow_rx).await.conversation_id, Some(1));
    assert!(slow_rx.try_recv().is_err());
}

#[tokio::test]
async fn disconnect_is_idempotent_and_tolerates_dead_receivers() {
    let hub = Hub::spawn();

    let (conn, rx) = connect(&hub, 10, Role::User, 4).await;
    // Receiver side dies first (write loop gone before unregister).
    drop(rx);

    hub.broadcast(
        BroadcastTarget::Users(vec![10]),
        ServerEvent::conversation_update(1),
    )
    .await;

    hub.unregister(conn, 10).await;
    hub.unregister(conn, 10).await;
    hub.unregister(Uuid::new_v4(), 10).await;

    assert!(!hub.is_online(10).await);
}

#[tokio::test]
async fn admins_see_user_presence_changes() {
    let hub = Hub::spawn();
    let (_admin, mut admin_rx) = connect(&hub, 99, Role::Admin, 8).await;

    let (conn, _user_rx) = connect(&hub, 10, Role::User, 4).await;
    let event = next_event(&mut admin_rx).await;
    assert_eq!(event.kind, EventKind::UserOnline);
    assert_eq!(event.user_id, Some(10));

    hub.unregister(conn, 10).await;
    let event = next_event(&mut admin_rx).await;
    assert_eq!(event.kind, EventKind::UserOffline);
    assert_eq!(event.user_id, Some(10));
}

#[tokio::test]
async fn conversation_update_reaches_owner_and_admins() {
    let hub = Hub::spawn();

    let (_u, mut u_rx) = connect(&hub, 10, Role::User, 8).await;
    let (_other, mut other_rx) = connect(&hub, 11, Role::User, 8).await;
    let (_admin, mut admin_rx) = connect(&hub, 99, Role::Admin, 8).await;
    drain(&mut admin_rx);

    hub.broadcast_conversation_update(7, 10).await;

    assert_eq!(
        next_event(&mut u_rx).await.kind,
        EventKind::ConversationUpdate
    );
    assert_eq!(
        next_event(&mut admin_rx).await.kind,
        EventKind::ConversationUpdate
    );
    assert!(other_rx.try_recv().is_err());
}
