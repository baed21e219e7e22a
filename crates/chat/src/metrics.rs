// Process-local counters for the chat relay, exposed as JSON at /metrics.

use std::sync::{
    atomic::{AtomicI64, AtomicU64, Ordering},
    Arc, OnceLock,
};

use serde_json::{json, Value};

pub struct ChatMetrics {
    ws_connections_active: AtomicI64,
    ws_connections_total: AtomicU64,
    ws_auth_failures_total: AtomicU64,
    messages_persisted_total: AtomicU64,
    persistence_failures_total: AtomicU64,
    frames_dropped_total: AtomicU64,
    pushes_delivered_total: AtomicU64,
    pushes_skipped_total: AtomicU64,
}

static GLOBAL_METRICS: OnceLock<Arc<ChatMetrics>> = OnceLock::new();

impl Default for ChatMetrics {
    fn default() -> Self {
        Self {
            ws_connections_active: AtomicI64::new(0),
            ws_connections_total: AtomicU64::new(0),
            ws_auth_failures_total: AtomicU64::new(0),
            messages_persisted_total: AtomicU64::new(0),
            persistence_failures_total: AtomicU64::new(0),
            frames_dropped_total: AtomicU64::new(0),
            pushes_delivered_total: AtomicU64::new(0),
            pushes_skipped_total: AtomicU64::new(0),
        }
    }
}

fn global() -> &'static Arc<ChatMetrics> {
    GLOBAL_METRICS.get_or_init(|| Arc::new(ChatMetrics::default()))
}

pub fn record_connection_opened() {
    let metrics = global();
    metrics.ws_connections_active.fetch_add(1, Ordering::Relaxed);
    metrics.ws_connections_total.fetch_add(1, Ordering::Relaxed);
}

pub fn record_connection_closed() {
    global().ws_connections_active.fetch_sub(1, Ordering::Relaxed);
}

pub fn record_auth_failure() {
    global().ws_auth_failures_total.fetch_add(1, Ordering::Relaxed);
}

pub fn record_message_persisted() {
    global().messages_persisted_total.fetch_add(1, Ordering::Relaxed);
}

pub fn record_persistence_failure() {
    global().persistence_failures_total.fetch_add(1, Ordering::Relaxed);
}

pub fn record_frame_dropped() {
    global().frames_dropped_total.fetch_add(1, Ordering::Relaxed);
}

pub fn record_push(delivered: bool) {
    let metrics = global();
    if delivered {
        metrics.pushes_delivered_total.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.pushes_skipped_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn snapshot() -> Value {
    let metrics = global();
    json!({
        "ws_connections_active": metrics.ws_connections_active.load(Ordering::Relaxed),
        "ws_connections_total": metrics.ws_connections_total.load(Ordering::Relaxed),
        "ws_auth_failures_total": metrics.ws_auth_failures_total.load(Ordering::Relaxed),
        "messages_persisted_total": metrics.messages_persisted_total.load(Ordering::Relaxed),
        "persistence_failures_total": metrics.persistence_failures_total.load(Ordering::Relaxed),
        "frames_dropped_total": metrics.frames_dropped_total.load(Ordering::Relaxed),
        "pushes_delivered_total": metrics.pushes_delivered_total.load(Ordering::Relaxed),
        "pushes_skipped_total": metrics.pushes_skipped_total.load(Ordering::Relaxed),
    })
}
