//! Prometheus metrics collection for agorad.
//!
//! Tracks hub health: connection counts, event throughput, and the
//! failure modes the hub absorbs silently (dropped events on full queues,
//! malformed frames, rejected handshakes). Exposed on the HTTP endpoint
//! for scraping.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters (monotonic increasing)
// ========================================================================

/// Total event frames written to client sockets.
pub static EVENTS_SENT: OnceLock<IntCounter> = OnceLock::new();

/// Total events dropped because a recipient's outbound queue was full.
pub static EVENTS_DROPPED: OnceLock<IntCounter> = OnceLock::new();

/// Total inbound frames that failed to parse as a client event.
pub static MALFORMED_FRAMES: OnceLock<IntCounter> = OnceLock::new();

/// Handshake rejections by reason (missing/expired/invalid token, origin).
pub static HANDSHAKES_REJECTED: OnceLock<IntCounterVec> = OnceLock::new();

/// Inbound client events by type.
pub static CLIENT_EVENTS: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges (can increase/decrease)
// ========================================================================

/// Currently connected users (one per user id).
pub static CONNECTED_USERS: OnceLock<IntGauge> = OnceLock::new();

/// Currently connected admins (subset of connected users).
pub static CONNECTED_ADMINS: OnceLock<IntGauge> = OnceLock::new();

// ========================================================================
// Histograms
// ========================================================================

/// Recipients actually enqueued per broadcast.
pub static BROADCAST_FANOUT: OnceLock<Histogram> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded.
pub fn init() {
    let r = registry();

    // Helper macro to register metric
    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    register!(EVENTS_SENT, IntCounter::new("hub_events_sent_total", "Event frames written to clients"));
    register!(EVENTS_DROPPED, IntCounter::new("hub_events_dropped_total", "Events dropped on full outbound queues"));
    register!(MALFORMED_FRAMES, IntCounter::new("hub_malformed_frames_total", "Inbound frames that failed to parse"));
    register!(HANDSHAKES_REJECTED, IntCounterVec::new(Opts::new("hub_handshakes_rejected_total", "Rejected upgrade attempts by reason"), &["reason"]));
    register!(CLIENT_EVENTS, IntCounterVec::new(Opts::new("hub_client_events_total", "Inbound client events by type"), &["type"]));
    register!(CONNECTED_USERS, IntGauge::new("hub_connected_users", "Currently connected users"));
    register!(CONNECTED_ADMINS, IntGauge::new("hub_connected_admins", "Currently connected admins"));
    register!(BROADCAST_FANOUT, Histogram::with_opts(
        HistogramOpts::new("hub_broadcast_fanout", "Recipients enqueued per broadcast")
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0])));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helper functions for hub metric updates
// ============================================================================

#[inline]
pub fn inc_connected_users() {
    if let Some(g) = CONNECTED_USERS.get() {
        g.inc();
    }
}

#[inline]
pub fn dec_connected_users() {
    if let Some(g) = CONNECTED_USERS.get() {
        g.dec();
    }
}

#[inline]
pub fn set_connected_admins(count: usize) {
    if let Some(g) = CONNECTED_ADMINS.get() {
        g.set(count as i64);
    }
}

#[inline]
pub fn inc_events_sent() {
    if let Some(c) = EVENTS_SENT.get() {
        c.inc();
    }
}

#[inline]
pub fn inc_events_dropped() {
    if let Some(c) = EVENTS_DROPPED.get() {
        c.inc();
    }
}

#[inline]
pub fn inc_malformed_frames() {
    if let Some(c) = MALFORMED_FRAMES.get() {
        c.inc();
    }
}

/// Record a rejected upgrade attempt.
#[inline]
pub fn record_handshake_rejected(reason: &str) {
    if let Some(c) = HANDSHAKES_REJECTED.get() {
        c.with_label_values(&[reason]).inc();
    }
}

/// Record an inbound client event by type.
#[inline]
pub fn record_client_event(kind: &str) {
    if let Some(c) = CLIENT_EVENTS.get() {
        c.with_label_values(&[kind]).inc();
    }
}

/// Record broadcast fan-out (how many recipients were enqueued).
#[inline]
pub fn record_fanout(recipients: usize) {
    if let Some(h) = BROADCAST_FANOUT.get() {
        h.observe(recipients as f64);
    }
}
