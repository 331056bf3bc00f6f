//! Connection - read/write loops for one upgraded WebSocket.
//!
//! Each accepted socket is split once:
//!
//! - the **write loop** (spawned task) is the only owner of the sink; it
//!   drains the bounded outbound queue and ticks the heartbeat Ping, so
//!   no two tasks ever write the same socket;
//! - the **read loop** (the connection task itself) owns the stream,
//!   decodes inbound frames under an idle deadline, and hands events to
//!   the router.
//!
//! There is no cancellation token. A loop ends only when its socket
//! closes, its queue closes, a write fails, or the idle deadline passes -
//! every path converges on unregister, which is safe to hit twice.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::auth::Claims;
use crate::config::{HeartbeatConfig, HubConfig};
use crate::events::ClientEvent;
use crate::hub::{ConnectionHandle, Hub};
use crate::metrics;
use crate::router::{EventRouter, Sender};

/// One authenticated party's live connection.
pub struct Connection {
    conn_id: Uuid,
    claims: Claims,
    hub: Hub,
    router: EventRouter,
    heartbeat: HeartbeatConfig,
    queue_capacity: usize,
}

impl Connection {
    pub fn new(
        claims: Claims,
        hub: Hub,
        router: EventRouter,
        heartbeat: HeartbeatConfig,
        hub_config: HubConfig,
    ) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            claims,
            hub,
            router,
            heartbeat,
            queue_capacity: hub_config.queue_capacity,
        }
    }

    /// Register with the hub, run both loops, and clean up. Returns when
    /// the peer is gone.
    #[instrument(
        skip(self, socket),
        fields(conn_id = %self.conn_id, user_id = self.claims.sub),
        name = "connection"
    )]
    pub async fn run<S>(self, socket: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::channel::<Arc<str>>(self.queue_capacity);

        // The hub's map entry holds the only sender: from here on the
        // registry decides what this connection is told.
        self.hub
            .register(ConnectionHandle::new(
                self.conn_id,
                self.claims.sub,
                self.claims.role,
                tx,
            ))
            .await;

        info!(admin = self.claims.role.is_admin(), "client connected");

        let ping_interval = Duration::from_secs(self.heartbeat.ping);
        let writer = tokio::spawn(write_loop(sink, rx, ping_interval));

        self.read_loop(stream).await;

        self.hub.unregister(self.conn_id, self.claims.sub).await;
        // Unregister closed the queue (unless a replacement already had),
        // so the write loop is exiting on its own.
        let _ = writer.await;

        info!("client disconnected");
    }

    /// Decode inbound frames until the peer disappears. The idle deadline
    /// restarts on every received frame, Pong included; a silent peer is
    /// treated exactly like a disconnected one.
    async fn read_loop<S>(&self, mut stream: SplitStream<WebSocketStream<S>>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let idle = Duration::from_secs(self.heartbeat.idle);
        let sender = Sender {
            conn_id: self.conn_id,
            user_id: self.claims.sub,
            role: self.claims.role,
        };

        loop {
            let frame = match timeout(idle, stream.next()).await {
                Err(_) => {
                    info!("idle timeout; treating peer as dead");
                    return;
                }
                Ok(None) => {
                    debug!("stream ended");
                    return;
                }
                Ok(Some(Err(e))) => {
                    debug!(error = %e, "read error");
                    return;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => self.router.dispatch(sender, event).await,
                    Err(e) => {
                        // Malformed input is the client's problem, not a
                        // reason to drop the connection.
                        metrics::inc_malformed_frames();
                        warn!(error = %e, "unparseable client event ignored");
                    }
                },
                Message::Binary(_) => {
                    metrics::inc_malformed_frames();
                    warn!("unexpected binary frame ignored");
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // Activity; the deadline already restarted. Pings are
                    // answered by the transport on the next write.
                }
                Message::Close(frame) => {
                    debug!(reason = ?frame, "client initiated close");
                    return;
                }
                Message::Frame(_) => {}
            }
        }
    }
}

/// Sole writer for the socket. Waits on the outbound queue and the
/// heartbeat tick, whichever fires first. Queue closed means the hub
/// dropped this connection (replacement or unregister): say goodbye and
/// exit. Any write failure means the peer is gone; the read loop observes
/// that on its side.
async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::Receiver<Arc<str>>,
    ping_interval: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ping_timer = interval(ping_interval);
    // Skip the immediate first tick.
    ping_timer.tick().await;

    loop {
        tokio::select! {
            maybe_frame = rx.recv() => match maybe_frame {
                Some(frame) => {
                    if sink.send(Message::Text(frame.to_string())).await.is_err() {
                        debug!("write failed; peer gone");
                        break;
                    }
                    metrics::inc_events_sent();
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ping_timer.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    debug!("ping write failed; peer gone");
                    break;
                }
            }
        }
    }
}
