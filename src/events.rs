//! Wire messages exchanged over the WebSocket.
//!
//! Every server-originated frame is one tagged JSON record; the `type`
//! enumeration is closed. Inbound client frames are a separate, smaller
//! tagged union. Events are transient: constructed, serialized, enqueued,
//! and discarded — the hub never persists them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User identifier, as assigned by the platform's account store.
pub type UserId = i64;

/// Conversation identifier, as assigned by the platform's message store.
pub type ConversationId = i64;

/// The closed set of server-originated event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NewMessage,
    MessageRead,
    Typing,
    StopTyping,
    UserOnline,
    UserOffline,
    ConversationUpdate,
}

impl EventKind {
    /// Static label for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewMessage => "new_message",
            Self::MessageRead => "message_read",
            Self::Typing => "typing",
            Self::StopTyping => "stop_typing",
            Self::UserOnline => "user_online",
            Self::UserOffline => "user_offline",
            Self::ConversationUpdate => "conversation_update",
        }
    }
}

/// A chat message as persisted by the platform, embedded in `new_message`
/// events verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: i64,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// One server-originated event frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessagePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

impl ServerEvent {
    fn new(kind: EventKind) -> Self {
        Self {
            kind,
            conversation_id: None,
            message: None,
            user_id: None,
            timestamp: Utc::now(),
        }
    }

    /// A newly persisted chat message.
    pub fn new_message(message: MessagePayload) -> Self {
        Self {
            conversation_id: Some(message.conversation_id),
            message: Some(message),
            ..Self::new(EventKind::NewMessage)
        }
    }

    /// `user_id` started typing in `conversation_id`.
    pub fn typing(conversation_id: ConversationId, user_id: UserId) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            user_id: Some(user_id),
            ..Self::new(EventKind::Typing)
        }
    }

    /// `user_id` stopped typing in `conversation_id`.
    pub fn stop_typing(conversation_id: ConversationId, user_id: UserId) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            user_id: Some(user_id),
            ..Self::new(EventKind::StopTyping)
        }
    }

    /// `user_id` came online.
    pub fn user_online(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::new(EventKind::UserOnline)
        }
    }

    /// `user_id` went offline.
    pub fn user_offline(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::new(EventKind::UserOffline)
        }
    }

    /// Conversation metadata changed (subject, status, assignment).
    pub fn conversation_update(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            ..Self::new(EventKind::ConversationUpdate)
        }
    }
}

/// Inbound client events.
///
/// Anything that fails to parse as one of these — unknown `type`, missing
/// fields, malformed JSON — is logged and dropped by the read loop, never
/// fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Typing { conversation_id: ConversationId },
    StopTyping { conversation_id: ConversationId },
    MessageRead { conversation_id: ConversationId },
}

impl ClientEvent {
    /// Static label for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::MessageRead { .. } => "message_read",
        }
    }
}
