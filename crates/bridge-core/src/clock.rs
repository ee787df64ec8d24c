//! Injected wall-clock capability.
//!
//! Most timing in the core runs on the tokio clock (pausable in tests); the
//! wall clock is only consulted for conference-id generation and activity
//! timestamps, and is injectable so those paths are deterministic in tests.

use std::time::{SystemTime, UNIX_EPOCH};

/// A source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn wall_clock_millis(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wall_clock_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Clock;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A clock advanced explicitly by tests.
    #[derive(Debug, Default)]
    pub struct ManualClock {
        millis: AtomicU64,
    }

    impl ManualClock {
        pub fn at(millis: u64) -> Self {
            Self {
                millis: AtomicU64::new(millis),
            }
        }

        pub fn advance(&self, millis: u64) {
            self.millis.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn wall_clock_millis(&self) -> u64 {
            self.millis.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::testing::ManualClock;
    use super::*;

    #[test]
    fn test_system_clock_is_past_2020() {
        // 2020-01-01T00:00:00Z in milliseconds.
        assert!(SystemClock.wall_clock_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at(1_000);
        assert_eq!(clock.wall_clock_millis(), 1_000);
        clock.advance(500);
        assert_eq!(clock.wall_clock_millis(), 1_500);
    }
}
