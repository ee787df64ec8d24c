//! Bridge configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; every value can also be supplied through `from_vars` in tests.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default minimum time the graceful-shutdown advertisement must be visible
/// before the bridge exits.
pub const DEFAULT_GRACEFUL_SHUTDOWN_MIN_WINDOW_SECONDS: u64 = 60;

/// Default delay between a force-shutdown request and process exit.
pub const DEFAULT_FORCE_SHUTDOWN_DELAY_MILLIS: u64 = 1000;

/// Default period of the packet-rate load sampler.
pub const DEFAULT_LOAD_SAMPLE_INTERVAL_SECONDS: u64 = 10;

/// Default packet rate above which the bridge is considered overloaded.
pub const DEFAULT_LOADED_THRESHOLD_PPS: u64 = 50_000;

/// Default packet rate below which the bridge is considered recovered.
pub const DEFAULT_RECOVERY_THRESHOLD_PPS: u64 = 40_000;

/// Default factor applied to the effective last-N when shedding load.
pub const DEFAULT_LAST_N_REDUCTION_SCALE: f64 = 0.75;

/// Default period of the conference expiration sweeper.
pub const DEFAULT_EXPIRE_CHECK_INTERVAL_SECONDS: u64 = 20;

/// Default inactivity after which an empty conference is expired.
pub const DEFAULT_CONFERENCE_INACTIVITY_TIMEOUT_SECONDS: u64 = 90;

/// Prefix for auto-generated bridge instance ids.
pub const DEFAULT_BRIDGE_ID_PREFIX: &str = "bridge";

/// Bridge configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Unique identifier for this bridge instance (logging only).
    pub bridge_id: String,

    /// Minimum announcement window for graceful shutdown.
    pub graceful_shutdown_min_window: Duration,

    /// Delay before process exit on force shutdown.
    pub force_shutdown_delay: Duration,

    /// Load sampler period.
    pub load_sample_interval: Duration,

    /// Packet rate (pps) above which the bridge enters the overloaded state.
    pub loaded_threshold_pps: u64,

    /// Packet rate (pps) below which the bridge leaves the overloaded state.
    pub recovery_threshold_pps: u64,

    /// Factor in (0, 1) applied to last-N when shedding load.
    pub last_n_reduction_scale: f64,

    /// Expiration sweeper period.
    pub expire_check_interval: Duration,

    /// Inactivity after which an empty conference is expired.
    pub conference_inactivity_timeout: Duration,

    /// Whether the bridge starts in drain mode.
    pub initial_drain_mode: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

impl BridgeConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for out-of-range values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for out-of-range values.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let graceful_shutdown_min_window = Duration::from_secs(
            parse_or(vars, "BRIDGE_GRACEFUL_SHUTDOWN_MIN_WINDOW_SECONDS",
                DEFAULT_GRACEFUL_SHUTDOWN_MIN_WINDOW_SECONDS),
        );

        let force_shutdown_delay = Duration::from_millis(parse_or(
            vars,
            "BRIDGE_FORCE_SHUTDOWN_DELAY_MILLIS",
            DEFAULT_FORCE_SHUTDOWN_DELAY_MILLIS,
        ));

        let load_sample_interval = Duration::from_secs(parse_or(
            vars,
            "BRIDGE_LOAD_SAMPLE_INTERVAL_SECONDS",
            DEFAULT_LOAD_SAMPLE_INTERVAL_SECONDS,
        ));

        let loaded_threshold_pps = parse_or(
            vars,
            "BRIDGE_LOADED_THRESHOLD_PPS",
            DEFAULT_LOADED_THRESHOLD_PPS,
        );

        let recovery_threshold_pps = parse_or(
            vars,
            "BRIDGE_RECOVERY_THRESHOLD_PPS",
            DEFAULT_RECOVERY_THRESHOLD_PPS,
        );

        if recovery_threshold_pps >= loaded_threshold_pps {
            return Err(ConfigError::InvalidValue(format!(
                "recovery threshold ({recovery_threshold_pps} pps) must be below \
                 loaded threshold ({loaded_threshold_pps} pps)"
            )));
        }

        let last_n_reduction_scale: f64 = parse_or(
            vars,
            "BRIDGE_LAST_N_REDUCTION_SCALE",
            DEFAULT_LAST_N_REDUCTION_SCALE,
        );

        if !(last_n_reduction_scale > 0.0 && last_n_reduction_scale < 1.0) {
            return Err(ConfigError::InvalidValue(format!(
                "last-N reduction scale must be in (0, 1), got {last_n_reduction_scale}"
            )));
        }

        let expire_check_interval = Duration::from_secs(parse_or(
            vars,
            "BRIDGE_EXPIRE_CHECK_INTERVAL_SECONDS",
            DEFAULT_EXPIRE_CHECK_INTERVAL_SECONDS,
        ));

        let conference_inactivity_timeout = Duration::from_secs(parse_or(
            vars,
            "BRIDGE_CONFERENCE_INACTIVITY_TIMEOUT_SECONDS",
            DEFAULT_CONFERENCE_INACTIVITY_TIMEOUT_SECONDS,
        ));

        let initial_drain_mode = vars
            .get("BRIDGE_INITIAL_DRAIN_MODE")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);

        let bridge_id = vars.get("BRIDGE_ID").cloned().unwrap_or_else(|| {
            let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000").to_string();
            format!("{DEFAULT_BRIDGE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(BridgeConfig {
            bridge_id,
            graceful_shutdown_min_window,
            force_shutdown_delay,
            load_sample_interval,
            loaded_threshold_pps,
            recovery_threshold_pps,
            last_n_reduction_scale,
            expire_check_interval,
            conference_inactivity_timeout,
            initial_drain_mode,
        })
    }
}

fn parse_or<T: std::str::FromStr>(vars: &HashMap<String, String>, key: &str, default: T) -> T {
    vars.get(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_defaults() {
        let config = BridgeConfig::from_vars(&HashMap::new()).expect("defaults should load");

        assert_eq!(
            config.graceful_shutdown_min_window,
            Duration::from_secs(DEFAULT_GRACEFUL_SHUTDOWN_MIN_WINDOW_SECONDS)
        );
        assert_eq!(
            config.force_shutdown_delay,
            Duration::from_millis(DEFAULT_FORCE_SHUTDOWN_DELAY_MILLIS)
        );
        assert_eq!(
            config.load_sample_interval,
            Duration::from_secs(DEFAULT_LOAD_SAMPLE_INTERVAL_SECONDS)
        );
        assert_eq!(config.loaded_threshold_pps, DEFAULT_LOADED_THRESHOLD_PPS);
        assert_eq!(config.recovery_threshold_pps, DEFAULT_RECOVERY_THRESHOLD_PPS);
        assert!(!config.initial_drain_mode);
        assert!(config.bridge_id.starts_with("bridge-"));
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            ("BRIDGE_ID".to_string(), "bridge-test-001".to_string()),
            (
                "BRIDGE_GRACEFUL_SHUTDOWN_MIN_WINDOW_SECONDS".to_string(),
                "5".to_string(),
            ),
            (
                "BRIDGE_FORCE_SHUTDOWN_DELAY_MILLIS".to_string(),
                "250".to_string(),
            ),
            ("BRIDGE_LOADED_THRESHOLD_PPS".to_string(), "1000".to_string()),
            ("BRIDGE_RECOVERY_THRESHOLD_PPS".to_string(), "800".to_string()),
            ("BRIDGE_INITIAL_DRAIN_MODE".to_string(), "true".to_string()),
        ]);

        let config = BridgeConfig::from_vars(&vars).expect("config should load");
        assert_eq!(config.bridge_id, "bridge-test-001");
        assert_eq!(config.graceful_shutdown_min_window, Duration::from_secs(5));
        assert_eq!(config.force_shutdown_delay, Duration::from_millis(250));
        assert_eq!(config.loaded_threshold_pps, 1000);
        assert_eq!(config.recovery_threshold_pps, 800);
        assert!(config.initial_drain_mode);
    }

    #[test]
    fn test_thresholds_must_leave_hysteresis_gap() {
        let vars = HashMap::from([
            ("BRIDGE_LOADED_THRESHOLD_PPS".to_string(), "1000".to_string()),
            ("BRIDGE_RECOVERY_THRESHOLD_PPS".to_string(), "1000".to_string()),
        ]);

        let result = BridgeConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_reduction_scale_range() {
        let vars = HashMap::from([(
            "BRIDGE_LAST_N_REDUCTION_SCALE".to_string(),
            "1.5".to_string(),
        )]);

        let result = BridgeConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_unparsable_value_falls_back_to_default() {
        let vars = HashMap::from([(
            "BRIDGE_LOAD_SAMPLE_INTERVAL_SECONDS".to_string(),
            "not-a-number".to_string(),
        )]);

        let config = BridgeConfig::from_vars(&vars).expect("config should load");
        assert_eq!(
            config.load_sample_interval,
            Duration::from_secs(DEFAULT_LOAD_SAMPLE_INTERVAL_SECONDS)
        );
    }
}
