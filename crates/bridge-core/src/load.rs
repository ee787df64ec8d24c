//! Bridge load management.
//!
//! A periodic sampler sums the packet rate over all live conferences and
//! feeds the measurement to a hysteresis machine. Crossing the loaded
//! threshold triggers the configured reducer (lowering the global last-N);
//! dropping below the recovery threshold steps the reduction back out.

use crate::conference::Conference;
use crate::stats::Statistics;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Provider of the live conference snapshot.
pub type ConferenceSupplier = Arc<dyn Fn() -> Vec<Arc<Conference>> + Send + Sync>;

/// One bridge-wide packet-rate sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketRateMeasurement {
    pub packets_per_second: u64,
}

impl fmt::Display for PacketRateMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pps", self.packets_per_second)
    }
}

/// Load-shedding hook invoked by the manager on state transitions.
pub trait LoadReducer: Send + Sync {
    /// The bridge has become overloaded; shed load.
    fn reduce_load(&self);

    /// The bridge has recovered below the recovery threshold; undo one step
    /// of reduction. Returns whether anything was left to undo.
    fn recover(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Normal,
    Overloaded,
}

struct ManagerState {
    state: LoadState,
    last_measurement: Option<PacketRateMeasurement>,
}

/// Hysteresis machine over packet-rate measurements.
pub struct BridgeLoadManager {
    loaded_threshold_pps: u64,
    recovery_threshold_pps: u64,
    reducer: Arc<dyn LoadReducer>,
    state: Mutex<ManagerState>,
    stress: crate::stats::F64Gauge,
}

impl BridgeLoadManager {
    #[must_use]
    pub fn new(
        loaded_threshold_pps: u64,
        recovery_threshold_pps: u64,
        reducer: Arc<dyn LoadReducer>,
    ) -> Self {
        Self {
            loaded_threshold_pps,
            recovery_threshold_pps,
            reducer,
            state: Mutex::new(ManagerState {
                state: LoadState::Normal,
                last_measurement: None,
            }),
            stress: crate::stats::F64Gauge::default(),
        }
    }

    /// Feed one measurement through the hysteresis machine.
    #[allow(clippy::cast_precision_loss)]
    pub fn load_update(&self, measurement: PacketRateMeasurement) {
        let stress =
            measurement.packets_per_second as f64 / self.loaded_threshold_pps as f64;
        self.stress.set(stress);

        let mut inner = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        inner.last_measurement = Some(measurement);

        match inner.state {
            LoadState::Normal if measurement.packets_per_second > self.loaded_threshold_pps => {
                inner.state = LoadState::Overloaded;
                warn!(
                    target: "bridge.load",
                    %measurement,
                    loaded_threshold_pps = self.loaded_threshold_pps,
                    "Bridge overloaded, reducing load"
                );
                self.reducer.reduce_load();
            }
            LoadState::Overloaded
                if measurement.packets_per_second < self.recovery_threshold_pps =>
            {
                inner.state = LoadState::Normal;
                let recovered = self.reducer.recover();
                info!(
                    target: "bridge.load",
                    %measurement,
                    recovered,
                    "Bridge load back below recovery threshold"
                );
            }
            _ => {}
        }
    }

    /// Smoothed scalar load indicator: last rate over the loaded threshold.
    #[must_use]
    pub fn current_stress_level(&self) -> f64 {
        self.stress.get()
    }

    #[must_use]
    pub fn state(&self) -> LoadState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Ordered map consumed by the debug snapshot's `load-management` entry.
    #[must_use]
    pub fn stats(&self) -> serde_json::Value {
        let inner = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = serde_json::Map::new();
        map.insert(
            "state".to_string(),
            match inner.state {
                LoadState::Normal => "normal",
                LoadState::Overloaded => "overloaded",
            }
            .into(),
        );
        map.insert("stress_level".to_string(), self.stress.get().into());
        map.insert(
            "loaded_threshold_pps".to_string(),
            self.loaded_threshold_pps.into(),
        );
        map.insert(
            "recovery_threshold_pps".to_string(),
            self.recovery_threshold_pps.into(),
        );
        map.insert(
            "last_measurement_pps".to_string(),
            inner
                .last_measurement
                .map(|m| m.packets_per_second)
                .into(),
        );
        serde_json::Value::Object(map)
    }
}

/// The effective global last-N: the maximum number of simultaneously
/// forwarded video streams per receiver. [`LastN::UNLIMITED`] disables the
/// cap.
#[derive(Debug)]
pub struct LastN {
    value: AtomicI64,
}

impl LastN {
    pub const UNLIMITED: i64 = -1;

    #[must_use]
    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(Self::UNLIMITED),
        }
    }

    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }
}

impl Default for LastN {
    fn default() -> Self {
        Self::new()
    }
}

/// Sheds load by lowering the effective global last-N.
pub struct LastNReducer {
    conferences: ConferenceSupplier,
    last_n: Arc<LastN>,
    reduction_scale: f64,
}

impl LastNReducer {
    #[must_use]
    pub fn new(conferences: ConferenceSupplier, last_n: Arc<LastN>, reduction_scale: f64) -> Self {
        Self {
            conferences,
            last_n,
            reduction_scale,
        }
    }

    /// The last-N value reductions start from: the configured value when one
    /// is set, otherwise the largest endpoint count among live conferences.
    fn effective_last_n(&self) -> i64 {
        let configured = self.last_n.get();
        if configured != LastN::UNLIMITED {
            return configured;
        }
        let max_endpoints = (self.conferences)()
            .iter()
            .map(|c| c.endpoint_count())
            .max()
            .unwrap_or(0);
        i64::try_from(max_endpoints).unwrap_or(i64::MAX).max(1)
    }
}

impl LoadReducer for LastNReducer {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn reduce_load(&self) {
        let current = self.effective_last_n();
        let reduced = ((current as f64 * self.reduction_scale).floor() as i64).max(1);
        self.last_n.set(reduced);
        info!(
            target: "bridge.load",
            from = current,
            to = reduced,
            "Reduced global last-N"
        );
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn recover(&self) -> bool {
        let current = self.last_n.get();
        if current == LastN::UNLIMITED {
            return false;
        }

        let stepped = ((current as f64) / self.reduction_scale).ceil() as i64;
        let max_endpoints = (self.conferences)()
            .iter()
            .map(|c| c.endpoint_count())
            .max()
            .unwrap_or(0);
        let restored = if stepped >= i64::try_from(max_endpoints).unwrap_or(i64::MAX) {
            LastN::UNLIMITED
        } else {
            stepped
        };
        self.last_n.set(restored);
        info!(
            target: "bridge.load",
            from = current,
            to = restored,
            "Restored global last-N"
        );
        true
    }
}

/// Spawn the periodic load sampler.
///
/// Every tick sums the packet rates of all live conferences, feeds the
/// manager, and publishes the resulting stress level.
pub fn spawn_load_sampler(
    conferences: ConferenceSupplier,
    manager: Arc<BridgeLoadManager>,
    statistics: Arc<Statistics>,
    interval: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let packets_per_second =
                        (conferences)().iter().map(|c| c.packet_rate_pps()).sum();
                    let measurement = PacketRateMeasurement { packets_per_second };
                    manager.load_update(measurement);

                    let stress = manager.current_stress_level();
                    statistics.set_stress_level(stress);
                    metrics::gauge!("bridge_stress_level").set(stress);

                    debug!(
                        target: "bridge.load",
                        %measurement,
                        stress_level = stress,
                        "Load sample"
                    );
                }
            }
        }

        debug!(target: "bridge.load", "Load sampler stopped");
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingReducer {
        reductions: AtomicUsize,
        recoveries: AtomicUsize,
    }

    impl LoadReducer for CountingReducer {
        fn reduce_load(&self) {
            self.reductions.fetch_add(1, Ordering::SeqCst);
        }

        fn recover(&self) -> bool {
            self.recoveries.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn manager_with(reducer: Arc<CountingReducer>) -> BridgeLoadManager {
        BridgeLoadManager::new(1000, 800, reducer)
    }

    fn sample(pps: u64) -> PacketRateMeasurement {
        PacketRateMeasurement {
            packets_per_second: pps,
        }
    }

    #[test]
    fn test_hysteresis_transitions() {
        let reducer = Arc::new(CountingReducer::default());
        let manager = manager_with(Arc::clone(&reducer));

        assert_eq!(manager.state(), LoadState::Normal);

        // Below the loaded threshold: nothing happens.
        manager.load_update(sample(900));
        assert_eq!(manager.state(), LoadState::Normal);
        assert_eq!(reducer.reductions.load(Ordering::SeqCst), 0);

        // Crossing the loaded threshold triggers exactly one reduction.
        manager.load_update(sample(1500));
        assert_eq!(manager.state(), LoadState::Overloaded);
        assert_eq!(reducer.reductions.load(Ordering::SeqCst), 1);

        // Staying high does not re-trigger.
        manager.load_update(sample(2000));
        assert_eq!(reducer.reductions.load(Ordering::SeqCst), 1);

        // In the hysteresis band: still overloaded, no recovery.
        manager.load_update(sample(900));
        assert_eq!(manager.state(), LoadState::Overloaded);
        assert_eq!(reducer.recoveries.load(Ordering::SeqCst), 0);

        // Below the recovery threshold: back to normal, one recovery.
        manager.load_update(sample(700));
        assert_eq!(manager.state(), LoadState::Normal);
        assert_eq!(reducer.recoveries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stress_level_is_rate_over_loaded_threshold() {
        let manager = manager_with(Arc::new(CountingReducer::default()));

        manager.load_update(sample(500));
        assert!((manager.current_stress_level() - 0.5).abs() < f64::EPSILON);

        // Stress can exceed 1.0 under overload.
        manager.load_update(sample(1500));
        assert!((manager.current_stress_level() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_projection() {
        let manager = manager_with(Arc::new(CountingReducer::default()));
        manager.load_update(sample(400));

        let stats = manager.stats();
        assert_eq!(stats["state"], "normal");
        assert_eq!(stats["loaded_threshold_pps"], 1000);
        assert_eq!(stats["last_measurement_pps"], 400);
    }

    #[test]
    fn test_last_n_reducer_steps_down_and_back() {
        let last_n = Arc::new(LastN::new());
        let no_conferences: ConferenceSupplier = Arc::new(Vec::new);
        let reducer = LastNReducer::new(no_conferences, Arc::clone(&last_n), 0.5);

        assert_eq!(last_n.get(), LastN::UNLIMITED);

        // Unlimited with no conferences: reduction bottoms out at 1.
        reducer.reduce_load();
        assert_eq!(last_n.get(), 1);

        // Recovery with no endpoints anywhere returns to unlimited.
        assert!(reducer.recover());
        assert_eq!(last_n.get(), LastN::UNLIMITED);

        // Nothing to recover once unlimited.
        assert!(!reducer.recover());
    }

    #[test]
    fn test_last_n_reducer_halves_configured_value() {
        let last_n = Arc::new(LastN::new());
        last_n.set(8);
        let no_conferences: ConferenceSupplier = Arc::new(Vec::new);
        let reducer = LastNReducer::new(no_conferences, Arc::clone(&last_n), 0.5);

        reducer.reduce_load();
        assert_eq!(last_n.get(), 4);
        reducer.reduce_load();
        assert_eq!(last_n.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_publishes_stress_into_statistics() {
        let reducer = Arc::new(CountingReducer::default());
        let manager = Arc::new(manager_with(reducer));
        let statistics = Arc::new(Statistics::new());
        let cancel = CancellationToken::new();

        // A fixed 500 pps "bridge" via a supplier of one synthetic conference.
        let conference = crate::conference::Conference::spawn(
            "feed".to_string(),
            &crate::conference::ConferenceParams {
                name: None,
                gid: bridge_signaling::GID_NOT_SET,
                meeting_id: None,
                rtcstats_enabled: false,
                callstats_enabled: false,
            },
            Duration::from_secs(90),
            Arc::new(crate::clock::SystemClock),
        );
        conference.set_packet_rate_pps(500);
        let supplier: ConferenceSupplier = {
            let conference = Arc::clone(&conference);
            Arc::new(move || vec![Arc::clone(&conference)])
        };

        let task = spawn_load_sampler(
            supplier,
            Arc::clone(&manager),
            Arc::clone(&statistics),
            Duration::from_secs(10),
            cancel.clone(),
        );

        // First tick fires immediately.
        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert!((statistics.stress_level() - 0.5).abs() < f64::EPSILON);

        cancel.cancel();
        task.await.unwrap();
    }
}
