//! Process-wide queue statistics.
//!
//! Packet and message queues all over the bridge (the core's signaling
//! ingress queue, the media plane's send/receive queues) report into one
//! registry keyed by well-known queue names, so the operational surface is
//! stable regardless of which components happen to be running.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// The core's conference signaling ingress queue.
pub const SIGNALING_QUEUE: &str = "colibri_queue";

/// Well-known queue names owned by external media-plane components. They are
/// pre-registered so the queue-statistics surface always lists them.
pub const WELL_KNOWN_QUEUES: &[&str] = &[
    "srtp_send_queue",
    "relay_srtp_send_queue",
    "octo_receive_queue",
    "octo_send_queue",
    "rtp_receiver_queue",
    "rtp_sender_queue",
    SIGNALING_QUEUE,
    "incoming_message_queue",
];

/// Shallow add/drop counters for a single queue.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    packets_added: AtomicU64,
    packets_dropped: AtomicU64,
}

impl QueueMetrics {
    pub fn record_added(&self) {
        self.packets_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn packets_added(&self) -> u64 {
        self.packets_added.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped.load(Ordering::Relaxed)
    }
}

/// Error counters a queue owner may attach alongside its metrics.
#[derive(Debug, Default)]
pub struct CountingErrorHandler {
    packets_dropped: AtomicU64,
    exceptions: AtomicU64,
}

impl CountingErrorHandler {
    pub fn packet_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.exceptions.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn num_packets_dropped(&self) -> u64 {
        self.packets_dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn num_exceptions(&self) -> u64 {
        self.exceptions.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct QueueEntry {
    metrics: Arc<QueueMetrics>,
    errors: Option<Arc<CountingErrorHandler>>,
}

fn registry() -> &'static Mutex<HashMap<String, QueueEntry>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, QueueEntry>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock() -> std::sync::MutexGuard<'static, HashMap<String, QueueEntry>> {
    registry().lock().unwrap_or_else(PoisonError::into_inner)
}

/// Get (registering on first use) the metrics for a queue name.
#[must_use]
pub fn queue_metrics(name: &str) -> Arc<QueueMetrics> {
    let mut map = lock();
    Arc::clone(&map.entry(name.to_string()).or_default().metrics)
}

/// Attach an error counter to a queue name.
pub fn attach_error_handler(name: &str, handler: Arc<CountingErrorHandler>) {
    let mut map = lock();
    map.entry(name.to_string()).or_default().errors = Some(handler);
}

/// JSON projection of every registered queue, the well-known names always
/// included. Queues with an attached error counter also report
/// `dropped_packets` and `exceptions` from it.
#[must_use]
pub fn snapshot() -> Value {
    {
        let mut map = lock();
        for name in WELL_KNOWN_QUEUES {
            map.entry((*name).to_string()).or_default();
        }
    }

    let map = lock();
    let mut out = serde_json::Map::new();
    let mut names: Vec<&String> = map.keys().collect();
    names.sort();
    for name in names {
        let entry = &map[name];
        let mut queue = serde_json::Map::new();
        queue.insert(
            "packets_added".to_string(),
            entry.metrics.packets_added().into(),
        );
        queue.insert(
            "packets_dropped".to_string(),
            entry.metrics.packets_dropped().into(),
        );
        if let Some(errors) = &entry.errors {
            queue.insert(
                "dropped_packets".to_string(),
                errors.num_packets_dropped().into(),
            );
            queue.insert("exceptions".to_string(), errors.num_exceptions().into());
        }
        out.insert(name.clone(), Value::Object(queue));
    }
    Value::Object(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_metrics_counters() {
        let metrics = QueueMetrics::default();
        metrics.record_added();
        metrics.record_added();
        metrics.record_dropped();
        assert_eq!(metrics.packets_added(), 2);
        assert_eq!(metrics.packets_dropped(), 1);
    }

    #[test]
    fn test_queue_metrics_are_shared_by_name() {
        let a = queue_metrics("test_shared_queue");
        let b = queue_metrics("test_shared_queue");
        a.record_added();
        assert_eq!(b.packets_added(), 1);
    }

    #[test]
    fn test_snapshot_includes_well_known_queues() {
        let snapshot = snapshot();
        for name in WELL_KNOWN_QUEUES {
            assert!(
                snapshot.get(*name).is_some(),
                "missing well-known queue {name}"
            );
        }
    }

    #[test]
    fn test_snapshot_merges_error_handler() {
        let handler = Arc::new(CountingErrorHandler::default());
        handler.packet_dropped();
        handler.error();
        handler.error();
        attach_error_handler("test_error_queue", Arc::clone(&handler));

        let snapshot = snapshot();
        assert_eq!(snapshot["test_error_queue"]["dropped_packets"], 1);
        assert_eq!(snapshot["test_error_queue"]["exceptions"], 2);
    }
}
