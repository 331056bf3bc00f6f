//! agorad - the Agora platform's real-time messaging hub.
//!
//! A WebSocket daemon that keeps one live connection per authenticated
//! user and fans out chat events between users and the platform's admin
//! team. The interesting parts:
//!
//! - [`hub`]: single-control-loop registry; all registration and fan-out
//!   is serialized through one task, so the connection maps need no locks
//!   and operations resolve in one deterministic order.
//! - [`network`]: the gateway authenticates the upgrade request before it
//!   completes, then runs exactly two tasks per connection - a reader and
//!   the socket's only writer.
//! - [`router`]: the sender-role routing policy (users talk to the admin
//!   team, admins talk to the conversation owner).
//!
//! Conversation persistence, token issuance, and the rest of the platform
//! are collaborators behind [`conversations`] and [`auth`] seams; this
//! crate pushes events about state they own, it never owns that state.

pub mod auth;
pub mod config;
pub mod conversations;
pub mod events;
pub mod http;
pub mod hub;
pub mod metrics;
pub mod network;
pub mod router;
