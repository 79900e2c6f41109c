//! Prometheus metrics for the console.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, which is a programming error that should
//! surface on first use rather than be silently ignored.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_int_counter, register_int_gauge_vec, CounterVec, IntCounter,
    IntGaugeVec,
};

/// Push channel state (1 = current state).
/// Labels: state (connecting/open/closed)
pub static STREAM_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "fixhub_stream_state",
        "Push channel state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Push frames decoded into stream events.
pub static STREAM_EVENTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "fixhub_stream_events_total",
        "Stream events decoded and retained"
    )
    .unwrap()
});

/// Push frames dropped because they failed to decode.
pub static STREAM_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "fixhub_stream_dropped_total",
        "Push frames dropped on decode failure"
    )
    .unwrap()
});

/// Push channel reconnect attempts.
pub static STREAM_RECONNECT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "fixhub_stream_reconnect_total",
        "Push channel reconnect attempts"
    )
    .unwrap()
});

/// Refresh/poll outcomes per resource kind.
/// Labels: kind, outcome (ok/error)
pub static FETCH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fixhub_fetch_total",
        "Full-list fetches by resource kind and outcome",
        &["kind", "outcome"]
    )
    .unwrap()
});

/// Mutation outcomes per resource kind.
/// Labels: kind, op (create/update/delete/disconnect), outcome
pub static MUTATION_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fixhub_mutation_total",
        "Mutating requests by resource kind, operation and outcome",
        &["kind", "op", "outcome"]
    )
    .unwrap()
});

/// Requests rejected with 401.
pub static AUTH_REJECTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "fixhub_auth_rejected_total",
        "Authorized requests rejected by the hub"
    )
    .unwrap()
});

const STREAM_STATES: [&str; 3] = ["connecting", "open", "closed"];

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Mark `state` as the active push channel state.
    pub fn stream_state(state: &str) {
        for s in STREAM_STATES {
            STREAM_STATE
                .with_label_values(&[s])
                .set(i64::from(s == state));
        }
    }

    /// Record a decoded stream event.
    pub fn stream_event() {
        STREAM_EVENTS_TOTAL.inc();
    }

    /// Record a dropped push frame.
    pub fn stream_dropped() {
        STREAM_DROPPED_TOTAL.inc();
    }

    /// Record a reconnect attempt.
    pub fn stream_reconnect() {
        STREAM_RECONNECT_TOTAL.inc();
    }

    /// Record a full-list fetch.
    pub fn fetch(kind: &str, ok: bool) {
        FETCH_TOTAL
            .with_label_values(&[kind, outcome(ok)])
            .inc();
    }

    /// Record a mutating request.
    pub fn mutation(kind: &str, op: &str, ok: bool) {
        MUTATION_TOTAL
            .with_label_values(&[kind, op, outcome(ok)])
            .inc();
    }

    /// Record a 401 response.
    pub fn auth_rejected() {
        AUTH_REJECTED_TOTAL.inc();
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn render() -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mut buf = Vec::new();
        if encoder.encode(&prometheus::gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

fn outcome(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "error"
    }
}
