//! Bridge-wide statistics.
//!
//! A fixed set of monotone counters and a few gauges, all lock-free. The
//! core itself increments only what it owns (conference lifecycle counts,
//! stress level); the remaining counters are written by external components
//! and merged by conferences when they expire.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// Histogram over fixed value buckets, used for discarded-audio energy
/// scores. Thresholds are inclusive upper bounds; values above the last
/// threshold land in the overflow bucket.
#[derive(Debug)]
pub struct BucketStats {
    thresholds: Vec<u64>,
    buckets: Vec<AtomicU64>,
}

impl BucketStats {
    #[must_use]
    pub fn new(thresholds: Vec<u64>) -> Self {
        let buckets = (0..=thresholds.len()).map(|_| AtomicU64::new(0)).collect();
        Self { thresholds, buckets }
    }

    pub fn add_value(&self, value: u64) {
        let index = self
            .thresholds
            .iter()
            .position(|t| value <= *t)
            .unwrap_or(self.thresholds.len());
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (i, threshold) in self.thresholds.iter().enumerate() {
            map.insert(
                format!("<= {threshold}"),
                self.buckets[i].load(Ordering::Relaxed).into(),
            );
        }
        if let Some(last) = self.thresholds.last() {
            map.insert(
                format!("> {last}"),
                self.buckets[self.thresholds.len()]
                    .load(Ordering::Relaxed)
                    .into(),
            );
        }
        Value::Object(map)
    }
}

/// Atomic f64 gauge, stored as bits.
#[derive(Debug, Default)]
pub struct F64Gauge(AtomicU64);

impl F64Gauge {
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Cumulative statistics for one bridge instance.
#[derive(Debug)]
pub struct Statistics {
    // Conference lifecycle (owned by the core).
    pub total_conferences_created: AtomicU64,
    pub total_conferences_completed: AtomicU64,
    pub total_conference_seconds: AtomicU64,

    // Failure accounting (written at conference expiry).
    pub total_failed_conferences: AtomicU64,
    pub total_partially_failed_conferences: AtomicU64,

    // Media totals, merged by conferences at expiry.
    pub total_bytes_received: AtomicU64,
    pub total_bytes_sent: AtomicU64,
    pub total_packets_received: AtomicU64,
    pub total_packets_sent: AtomicU64,
    pub total_relay_bytes_received: AtomicU64,
    pub total_relay_bytes_sent: AtomicU64,
    pub total_relay_packets_received: AtomicU64,
    pub total_relay_packets_sent: AtomicU64,

    // Endpoint / relay accounting.
    pub total_endpoints: AtomicU64,
    pub total_relays: AtomicU64,
    pub dtls_failed_endpoints: AtomicU64,

    // ICE outcomes.
    pub total_ice_failed: AtomicU64,
    pub total_ice_succeeded: AtomicU64,
    pub total_ice_succeeded_tcp: AtomicU64,
    pub total_ice_succeeded_relayed: AtomicU64,

    // Speaker / video signal accounting.
    pub total_dominant_speaker_changes: AtomicU64,
    pub total_keyframes_received: AtomicU64,
    pub total_layering_changes_received: AtomicU64,
    pub total_video_stream_milliseconds_received: AtomicU64,
    pub preemptive_keyframe_requests_sent: AtomicU64,
    pub preemptive_keyframe_requests_suppressed: AtomicU64,

    // Loss-state participant time.
    pub total_loss_controlled_participant_ms: AtomicU64,
    pub total_loss_limited_participant_ms: AtomicU64,
    pub total_loss_degraded_participant_ms: AtomicU64,

    // Messaging totals.
    pub total_data_channel_messages_received: AtomicU64,
    pub total_data_channel_messages_sent: AtomicU64,
    pub total_websocket_messages_received: AtomicU64,
    pub total_websocket_messages_sent: AtomicU64,

    // Gauges.
    stress_level: F64Gauge,
    bridge_jitter: F64Gauge,

    /// Distribution of energy scores for discarded audio packets.
    pub tossed_packets_energy: BucketStats,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            total_conferences_created: AtomicU64::new(0),
            total_conferences_completed: AtomicU64::new(0),
            total_conference_seconds: AtomicU64::new(0),
            total_failed_conferences: AtomicU64::new(0),
            total_partially_failed_conferences: AtomicU64::new(0),
            total_bytes_received: AtomicU64::new(0),
            total_bytes_sent: AtomicU64::new(0),
            total_packets_received: AtomicU64::new(0),
            total_packets_sent: AtomicU64::new(0),
            total_relay_bytes_received: AtomicU64::new(0),
            total_relay_bytes_sent: AtomicU64::new(0),
            total_relay_packets_received: AtomicU64::new(0),
            total_relay_packets_sent: AtomicU64::new(0),
            total_endpoints: AtomicU64::new(0),
            total_relays: AtomicU64::new(0),
            dtls_failed_endpoints: AtomicU64::new(0),
            total_ice_failed: AtomicU64::new(0),
            total_ice_succeeded: AtomicU64::new(0),
            total_ice_succeeded_tcp: AtomicU64::new(0),
            total_ice_succeeded_relayed: AtomicU64::new(0),
            total_dominant_speaker_changes: AtomicU64::new(0),
            total_keyframes_received: AtomicU64::new(0),
            total_layering_changes_received: AtomicU64::new(0),
            total_video_stream_milliseconds_received: AtomicU64::new(0),
            preemptive_keyframe_requests_sent: AtomicU64::new(0),
            preemptive_keyframe_requests_suppressed: AtomicU64::new(0),
            total_loss_controlled_participant_ms: AtomicU64::new(0),
            total_loss_limited_participant_ms: AtomicU64::new(0),
            total_loss_degraded_participant_ms: AtomicU64::new(0),
            total_data_channel_messages_received: AtomicU64::new(0),
            total_data_channel_messages_sent: AtomicU64::new(0),
            total_websocket_messages_received: AtomicU64::new(0),
            total_websocket_messages_sent: AtomicU64::new(0),
            stress_level: F64Gauge::default(),
            bridge_jitter: F64Gauge::default(),
            // Energy-score buckets: 7, 15, ..., 119.
            tossed_packets_energy: BucketStats::new((1..16).map(|w| 8 * w - 1).collect()),
        }
    }

    pub fn set_stress_level(&self, stress: f64) {
        self.stress_level.set(stress);
    }

    #[must_use]
    pub fn stress_level(&self) -> f64 {
        self.stress_level.get()
    }

    pub fn set_bridge_jitter(&self, jitter_ms: f64) {
        self.bridge_jitter.set(jitter_ms);
    }

    #[must_use]
    pub fn bridge_jitter(&self) -> f64 {
        self.bridge_jitter.get()
    }

    /// Read-only JSON projection of the whole surface.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        let counters: &[(&str, &AtomicU64)] = &[
            ("total_conferences_created", &self.total_conferences_created),
            ("total_conferences_completed", &self.total_conferences_completed),
            ("total_conference_seconds", &self.total_conference_seconds),
            ("total_failed_conferences", &self.total_failed_conferences),
            (
                "total_partially_failed_conferences",
                &self.total_partially_failed_conferences,
            ),
            ("total_bytes_received", &self.total_bytes_received),
            ("total_bytes_sent", &self.total_bytes_sent),
            ("total_packets_received", &self.total_packets_received),
            ("total_packets_sent", &self.total_packets_sent),
            ("total_relay_bytes_received", &self.total_relay_bytes_received),
            ("total_relay_bytes_sent", &self.total_relay_bytes_sent),
            (
                "total_relay_packets_received",
                &self.total_relay_packets_received,
            ),
            ("total_relay_packets_sent", &self.total_relay_packets_sent),
            ("total_endpoints", &self.total_endpoints),
            ("total_relays", &self.total_relays),
            ("dtls_failed_endpoints", &self.dtls_failed_endpoints),
            ("total_ice_failed", &self.total_ice_failed),
            ("total_ice_succeeded", &self.total_ice_succeeded),
            ("total_ice_succeeded_tcp", &self.total_ice_succeeded_tcp),
            (
                "total_ice_succeeded_relayed",
                &self.total_ice_succeeded_relayed,
            ),
            (
                "total_dominant_speaker_changes",
                &self.total_dominant_speaker_changes,
            ),
            ("total_keyframes_received", &self.total_keyframes_received),
            (
                "total_layering_changes_received",
                &self.total_layering_changes_received,
            ),
            (
                "total_video_stream_milliseconds_received",
                &self.total_video_stream_milliseconds_received,
            ),
            (
                "preemptive_keyframe_requests_sent",
                &self.preemptive_keyframe_requests_sent,
            ),
            (
                "preemptive_keyframe_requests_suppressed",
                &self.preemptive_keyframe_requests_suppressed,
            ),
            (
                "total_loss_controlled_participant_ms",
                &self.total_loss_controlled_participant_ms,
            ),
            (
                "total_loss_limited_participant_ms",
                &self.total_loss_limited_participant_ms,
            ),
            (
                "total_loss_degraded_participant_ms",
                &self.total_loss_degraded_participant_ms,
            ),
            (
                "total_data_channel_messages_received",
                &self.total_data_channel_messages_received,
            ),
            (
                "total_data_channel_messages_sent",
                &self.total_data_channel_messages_sent,
            ),
            (
                "total_websocket_messages_received",
                &self.total_websocket_messages_received,
            ),
            (
                "total_websocket_messages_sent",
                &self.total_websocket_messages_sent,
            ),
        ];
        for (name, counter) in counters {
            map.insert((*name).to_string(), counter.load(Ordering::Relaxed).into());
        }
        map.insert("stress_level".to_string(), self.stress_level().into());
        map.insert(
            "overall_bridge_jitter".to_string(),
            self.bridge_jitter().into(),
        );
        map.insert(
            "tossed_packets_energy".to_string(),
            self.tossed_packets_energy.to_json(),
        );
        Value::Object(map)
    }
}
