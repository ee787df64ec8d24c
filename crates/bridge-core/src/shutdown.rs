//! Shutdown coordination.
//!
//! Graceful shutdown is a three-state machine: `Running`, then
//! `GracefulRequested` once an operator asks for it (the timestamp is fixed
//! at that moment), with `ForcingExit` terminal. While graceful shutdown is
//! requested, creation of new conferences is refused; existing conferences
//! run to natural expiry. The external shutdown service is started only
//! after the bridge is empty AND the minimum announcement window has
//! elapsed — upstream observers must see the shutdown advertisement at
//! least once, or they would classify the exit as a crash.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// The external service that actually takes the bridge down.
pub trait ShutdownService: Send + Sync {
    /// Begin the final shutdown. Invoked at most once.
    fn begin_shutdown(&self);
}

/// A [`ShutdownService`] that fires a [`CancellationToken`], for wiring the
/// coordinator to a signal-driven main loop.
pub struct TokenShutdownService {
    token: tokio_util::sync::CancellationToken,
}

impl TokenShutdownService {
    #[must_use]
    pub fn new(token: tokio_util::sync::CancellationToken) -> Self {
        Self { token }
    }
}

impl ShutdownService for TokenShutdownService {
    fn begin_shutdown(&self) {
        self.token.cancel();
    }
}

/// Coordinator state, exposed for the debug surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    GracefulRequested,
    ForcingExit,
}

struct StateInner {
    state: ShutdownState,
    requested_at: Option<Instant>,
}

/// Drives the shutdown state machine.
pub struct ShutdownCoordinator {
    min_announcement_window: Duration,
    force_delay: Duration,
    state: Mutex<StateInner>,
    shutdown_requested: AtomicBool,
    begin_invoked: AtomicBool,
    force_armed: AtomicBool,
    service: Arc<dyn ShutdownService>,
    exit_fn: Arc<dyn Fn() + Send + Sync>,
    conference_count: Arc<dyn Fn() -> usize + Send + Sync>,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new(
        min_announcement_window: Duration,
        force_delay: Duration,
        service: Arc<dyn ShutdownService>,
        exit_fn: Arc<dyn Fn() + Send + Sync>,
        conference_count: Arc<dyn Fn() -> usize + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            min_announcement_window,
            force_delay,
            state: Mutex::new(StateInner {
                state: ShutdownState::Running,
                requested_at: None,
            }),
            shutdown_requested: AtomicBool::new(false),
            begin_invoked: AtomicBool::new(false),
            force_armed: AtomicBool::new(false),
            service,
            exit_fn,
            conference_count,
        })
    }

    /// Enter graceful shutdown mode. Idempotent: the request timestamp is
    /// fixed by the first call.
    pub fn request_graceful(self: &Arc<Self>) {
        {
            let mut inner = self.lock();
            if inner.state == ShutdownState::Running {
                inner.state = ShutdownState::GracefulRequested;
                inner.requested_at = Some(Instant::now());
                self.shutdown_requested.store(true, Ordering::SeqCst);
                info!(target: "bridge.shutdown", "Entered graceful shutdown mode");
            }
        }
        self.maybe_complete();
    }

    /// Request immediate exit after a short fixed delay, so in-flight
    /// logging can flush. Terminal. The exit timer is armed by the first
    /// call only; repeated calls do not re-arm or cancel it.
    pub fn request_force(self: &Arc<Self>) {
        {
            let mut inner = self.lock();
            inner.state = ShutdownState::ForcingExit;
        }
        warn!(
            target: "bridge.shutdown",
            delay = ?self.force_delay,
            "Will force shutdown"
        );

        if !self.force_armed.swap(true, Ordering::SeqCst) {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(this.force_delay).await;
                warn!(target: "bridge.shutdown", "Force shutdown - exiting now");
                (this.exit_fn)();
            });
        }
    }

    /// Run the quiescence check. Called on entering graceful mode and on
    /// every conference expiry, so the bridge exits promptly once empty.
    pub fn notify_conference_expired(self: &Arc<Self>) {
        self.maybe_complete();
    }

    /// Whether graceful shutdown has been requested (creates are refused).
    #[must_use]
    pub fn is_shutdown_in_progress(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn state(&self) -> ShutdownState {
        self.lock().state
    }

    fn maybe_complete(self: &Arc<Self>) {
        if !self.is_shutdown_in_progress() {
            return;
        }
        if (self.conference_count)() != 0 {
            return;
        }

        let requested_at = match self.lock().requested_at {
            Some(instant) => instant,
            None => return,
        };

        let elapsed = requested_at.elapsed();
        let remaining = self.min_announcement_window.saturating_sub(elapsed);
        if remaining.is_zero() {
            self.do_begin();
        } else {
            info!(
                target: "bridge.shutdown",
                delay = ?remaining,
                "Bridge is empty, will shut down after the announcement window"
            );
            let this = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(remaining).await;
                this.do_begin();
            });
        }
    }

    fn do_begin(&self) {
        if self.begin_invoked.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(target: "bridge.shutdown", "Bridge is shutting down NOW");
        self.service.begin_shutdown();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateInner> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingShutdownService {
        begun: AtomicUsize,
    }

    impl ShutdownService for CountingShutdownService {
        fn begin_shutdown(&self) {
            self.begun.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        coordinator: Arc<ShutdownCoordinator>,
        service: Arc<CountingShutdownService>,
        exits: Arc<AtomicUsize>,
        conferences: Arc<AtomicUsize>,
    }

    fn harness(window: Duration) -> Harness {
        let service = Arc::new(CountingShutdownService::default());
        let exits = Arc::new(AtomicUsize::new(0));
        let conferences = Arc::new(AtomicUsize::new(0));

        let exits_hook = Arc::clone(&exits);
        let conferences_hook = Arc::clone(&conferences);
        let coordinator = ShutdownCoordinator::new(
            window,
            Duration::from_secs(1),
            Arc::clone(&service) as Arc<dyn ShutdownService>,
            Arc::new(move || {
                exits_hook.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(move || conferences_hook.load(Ordering::SeqCst)),
        );

        Harness {
            coordinator,
            service,
            exits,
            conferences,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_with_no_conferences_waits_for_window() {
        let h = harness(Duration::from_secs(30));

        h.coordinator.request_graceful();
        tokio::task::yield_now().await;
        assert!(h.coordinator.is_shutdown_in_progress());
        assert_eq!(h.coordinator.state(), ShutdownState::GracefulRequested);

        // Empty bridge, but the announcement window has not elapsed.
        assert_eq!(h.service.begun.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(29)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.service.begun.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.service.begun.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_waits_for_conferences_to_expire() {
        let h = harness(Duration::from_secs(5));
        h.conferences.store(2, Ordering::SeqCst);

        h.coordinator.request_graceful();

        // Window elapses with live conferences: no shutdown.
        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.service.begun.load(Ordering::SeqCst), 0);

        // Conferences drain one by one.
        h.conferences.store(1, Ordering::SeqCst);
        h.coordinator.notify_conference_expired();
        tokio::task::yield_now().await;
        assert_eq!(h.service.begun.load(Ordering::SeqCst), 0);

        h.conferences.store(0, Ordering::SeqCst);
        h.coordinator.notify_conference_expired();
        tokio::task::yield_now().await;
        // Window already elapsed: begins inline.
        assert_eq!(h.service.begun.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_shutdown_invoked_at_most_once() {
        let h = harness(Duration::from_secs(0));

        h.coordinator.request_graceful();
        h.coordinator.notify_conference_expired();
        h.coordinator.notify_conference_expired();
        h.coordinator.request_graceful();
        tokio::task::yield_now().await;

        assert_eq!(h.service.begun.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_timestamp_fixed_by_first_request() {
        let h = harness(Duration::from_secs(10));

        h.coordinator.request_graceful();
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(8)).await;

        // A second request must not reset the window.
        h.coordinator.request_graceful();
        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.service.begun.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_exits_after_delay_exactly_once() {
        let h = harness(Duration::from_secs(30));

        h.coordinator.request_force();
        assert_eq!(h.coordinator.state(), ShutdownState::ForcingExit);
        assert_eq!(h.exits.load(Ordering::SeqCst), 0);

        // Calling again must not double the exit or re-arm the timer.
        h.coordinator.request_force();
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_millis(1100)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.exits.load(Ordering::SeqCst), 1);

        // And never fires again.
        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.exits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_is_terminal_over_graceful() {
        let h = harness(Duration::from_secs(30));

        h.coordinator.request_force();
        h.coordinator.request_graceful();
        assert_eq!(h.coordinator.state(), ShutdownState::ForcingExit);
    }
}
