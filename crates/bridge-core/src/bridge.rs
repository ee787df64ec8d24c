//! The bridge: conference registry, request routing, shutdown coordination,
//! load management and the debug surface, wired together.
//!
//! Request routing never waits for a conference to produce its reply: a
//! resolved request is handed to the target conference's ingress queue and
//! the router returns. The synchronous `handle_*_sync` variants exist for
//! inline test dispatch and return the reply value directly.

use crate::clock::{Clock, SystemClock};
use crate::conference::{Conference, ConferenceParams};
use crate::config::BridgeConfig;
use crate::errors::BridgeError;
use crate::events::{EventHandler, SyncEventEmitter};
use crate::expiry;
use crate::load::{
    spawn_load_sampler, BridgeLoadManager, ConferenceSupplier, LastN, LastNReducer,
};
use crate::queues;
use crate::registry::ConferenceRegistry;
use crate::shutdown::{ShutdownCoordinator, ShutdownService};
use crate::stats::Statistics;
use bridge_signaling::{
    provider, ConferenceModifyRequest, ConferenceRequest, Dialect, EntityBareJid, InboundRequest,
    SignalingReply, SignalingRequest, VersionInfo, GID_NOT_SET,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Default)]
struct BackgroundTasks {
    sampler: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

/// One bridge instance.
pub struct Bridge {
    config: BridgeConfig,
    registry: ConferenceRegistry,
    statistics: Arc<Statistics>,
    event_emitter: SyncEventEmitter,
    shutdown: Arc<ShutdownCoordinator>,
    load_manager: Arc<BridgeLoadManager>,
    last_n: Arc<LastN>,
    drain_mode: AtomicBool,
    tasks: Mutex<BackgroundTasks>,
    task_cancel: CancellationToken,
}

impl Bridge {
    /// Build a bridge.
    ///
    /// `shutdown_service` receives `begin_shutdown()` when graceful shutdown
    /// completes; `exit_fn` is invoked (once) on the force-shutdown path.
    pub fn new(
        config: BridgeConfig,
        shutdown_service: Arc<dyn ShutdownService>,
        exit_fn: Arc<dyn Fn() + Send + Sync>,
    ) -> Arc<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let statistics = Arc::new(Statistics::new());
        let last_n = Arc::new(LastN::new());

        Arc::new_cyclic(|weak: &Weak<Bridge>| {
            let count_hook = weak.clone();
            let shutdown = ShutdownCoordinator::new(
                config.graceful_shutdown_min_window,
                config.force_shutdown_delay,
                shutdown_service,
                exit_fn,
                Arc::new(move || count_hook.upgrade().map_or(0, |b| b.registry.count())),
            );

            let supplier_hook = weak.clone();
            let supplier: ConferenceSupplier = Arc::new(move || {
                supplier_hook
                    .upgrade()
                    .map_or_else(Vec::new, |b| b.registry.list())
            });
            let reducer = Arc::new(LastNReducer::new(
                supplier,
                Arc::clone(&last_n),
                config.last_n_reduction_scale,
            ));
            let load_manager = Arc::new(BridgeLoadManager::new(
                config.loaded_threshold_pps,
                config.recovery_threshold_pps,
                reducer,
            ));

            let registry = ConferenceRegistry::new(
                Arc::clone(&clock),
                Box::new(StdRng::from_entropy()),
                config.conference_inactivity_timeout,
            );

            let drain_mode = AtomicBool::new(config.initial_drain_mode);

            Bridge {
                config,
                registry,
                statistics,
                event_emitter: SyncEventEmitter::new(),
                shutdown,
                load_manager,
                last_n,
                drain_mode,
                tasks: Mutex::new(BackgroundTasks::default()),
                task_cancel: CancellationToken::new(),
            }
        })
    }

    /// Install the signaling element providers and start the background
    /// tasks (expiration sweeper, load sampler).
    pub fn start(self: &Arc<Self>) {
        provider::register_defaults();

        let mut tasks = self.tasks_lock();
        if tasks.sweeper.is_none() {
            tasks.sweeper = Some(expiry::spawn_expire_sweeper(
                Arc::downgrade(self),
                self.config.expire_check_interval,
                self.task_cancel.child_token(),
            ));
        }
        if tasks.sampler.is_none() {
            let supplier_hook = Arc::downgrade(self);
            let supplier: ConferenceSupplier = Arc::new(move || {
                supplier_hook
                    .upgrade()
                    .map_or_else(Vec::new, |b| b.registry.list())
            });
            tasks.sampler = Some(spawn_load_sampler(
                supplier,
                Arc::clone(&self.load_manager),
                Arc::clone(&self.statistics),
                self.config.load_sample_interval,
                self.task_cancel.child_token(),
            ));
        }

        info!(
            target: "bridge",
            bridge_id = %self.config.bridge_id,
            "Bridge started"
        );
    }

    /// Stop the background tasks.
    pub fn stop(&self) {
        self.task_cancel.cancel();
        let mut tasks = self.tasks_lock();
        tasks.sweeper.take();
        tasks.sampler.take();
        info!(target: "bridge", bridge_id = %self.config.bridge_id, "Bridge stopped");
    }

    /// Operator shutdown entry point.
    pub fn shutdown(self: &Arc<Self>, graceful: bool) {
        warn!(target: "bridge", graceful, "Received shutdown request");
        if graceful {
            self.shutdown.request_graceful();
        } else {
            self.shutdown.request_force();
        }
    }

    /// Toggle the advisory drain flag. The bridge keeps serving existing
    /// conferences; upstream reads the flag through stats/debug and stops
    /// assigning new ones.
    pub fn set_drain_mode(&self, enable: bool) {
        info!(target: "bridge", enable, "Received drain request");
        self.drain_mode.store(enable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn drain_mode(&self) -> bool {
        self.drain_mode.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_shutdown_in_progress(&self) -> bool {
        self.shutdown.is_shutdown_in_progress()
    }

    #[must_use]
    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.statistics
    }

    #[must_use]
    pub fn load_manager(&self) -> &Arc<BridgeLoadManager> {
        &self.load_manager
    }

    /// The effective global last-N value.
    #[must_use]
    pub fn last_n(&self) -> &Arc<LastN> {
        &self.last_n
    }

    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.event_emitter.add_handler(handler);
    }

    pub fn remove_event_handler(&self, handler: &Arc<dyn EventHandler>) {
        self.event_emitter.remove_handler(handler);
    }

    /// Snapshot read by bridge-local id.
    #[must_use]
    pub fn get_conference(&self, id: &str) -> Option<Arc<Conference>> {
        self.registry.get(id)
    }

    /// Snapshot read by meeting id.
    #[must_use]
    pub fn get_conference_by_meeting_id(&self, meeting_id: &str) -> Option<Arc<Conference>> {
        self.registry.get_by_meeting_id(meeting_id)
    }

    /// Independent snapshot of the live conference set.
    #[must_use]
    pub fn conferences(&self) -> Vec<Arc<Conference>> {
        self.registry.list()
    }

    #[must_use]
    pub fn conference_count(&self) -> usize {
        self.registry.count()
    }

    /// Create a conference with no meeting id and default flags. Intended
    /// for tests and tooling; signaling traffic goes through the routers.
    ///
    /// # Errors
    ///
    /// Creation without a meeting id cannot collide, so this only fails if
    /// the registry does.
    pub fn create_conference(
        &self,
        name: Option<EntityBareJid>,
    ) -> Result<Arc<Conference>, BridgeError> {
        let params = ConferenceParams {
            name,
            gid: GID_NOT_SET,
            meeting_id: None,
            rtcstats_enabled: false,
            callstats_enabled: false,
        };
        let conference = self.registry.create(&params, false)?;
        self.conference_created(&conference);
        Ok(conference)
    }

    /// Expire a conference: remove it from both indices (atomically), call
    /// its `expire()` exactly once, emit `conference_expired`, then run the
    /// shutdown quiescence check. No-op when the conference is no longer
    /// the live entry under its id.
    pub fn expire_conference(self: &Arc<Self>, conference: &Arc<Conference>) {
        if !self.registry.remove(conference) {
            debug!(
                target: "bridge.registry",
                conference_id = %conference.id(),
                "Conference already expired, ignoring"
            );
            return;
        }

        conference.expire();

        self.statistics
            .total_conferences_completed
            .fetch_add(1, Ordering::Relaxed);
        self.statistics
            .total_conference_seconds
            .fetch_add(conference.duration_seconds(), Ordering::Relaxed);
        metrics::counter!("bridge_conferences_expired_total").increment(1);

        self.event_emitter
            .fire(|handler| handler.conference_expired(conference));

        self.shutdown.notify_conference_expired();
    }

    /// Route one delivered request. Returns as soon as the request has been
    /// enqueued on the resolved conference (or answered with an error); the
    /// conference produces the actual reply through the request's callback.
    pub fn handle_request(self: &Arc<Self>, inbound: InboundRequest) {
        let InboundRequest { request, respond } = inbound;

        let (resolution, dialect) = match &request {
            SignalingRequest::Conference(iq) => (self.resolve_v1(iq), Dialect::V1),
            SignalingRequest::ConferenceModify(iq) => (self.resolve_v2(iq), Dialect::V2),
            SignalingRequest::HealthCheck => {
                respond(self.handle_health_check());
                return;
            }
            SignalingRequest::Version => {
                respond(self.handle_version_request());
                return;
            }
        };

        match resolution {
            Ok(conference) => conference.enqueue(InboundRequest { request, respond }),
            Err(error) => respond(SignalingReply::Error(error.to_error_reply(dialect))),
        }
    }

    /// Handle a dialect v1 request inline (test dispatch path).
    #[must_use]
    pub fn handle_conference_request_sync(&self, iq: &ConferenceRequest) -> SignalingReply {
        match self.resolve_v1(iq) {
            Ok(conference) => {
                conference.handle_sync(&SignalingRequest::Conference(iq.clone()))
            }
            Err(error) => SignalingReply::Error(error.to_error_reply(Dialect::V1)),
        }
    }

    /// Handle a dialect v2 request inline (test dispatch path).
    #[must_use]
    pub fn handle_conference_modify_sync(
        &self,
        iq: &ConferenceModifyRequest,
    ) -> SignalingReply {
        match self.resolve_v2(iq) {
            Ok(conference) => {
                conference.handle_sync(&SignalingRequest::ConferenceModify(iq.clone()))
            }
            Err(error) => SignalingReply::Error(error.to_error_reply(Dialect::V2)),
        }
    }

    /// Health probe: succeeds unless dispatch itself is broken, in which
    /// case the failure is reported as an internal error.
    #[must_use]
    pub fn handle_health_check(&self) -> SignalingReply {
        match self.health_probe() {
            Ok(()) => SignalingReply::Result,
            Err(detail) => {
                warn!(target: "bridge", detail = %detail, "Health check failed");
                SignalingReply::Error(bridge_signaling::ErrorReply::new(
                    bridge_signaling::ErrorCondition::InternalServerError,
                    detail,
                ))
            }
        }
    }

    /// Version query: application name, version string and host OS.
    #[must_use]
    pub fn handle_version_request(&self) -> SignalingReply {
        SignalingReply::Version(VersionInfo {
            application_name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
        })
    }

    /// Debug projection of bridge state.
    ///
    /// Without a conference id: a shallow map over all live conferences.
    /// With one: the full projection of that conference (optionally scoped
    /// to one endpoint), or the literal string `"null"` when the id is not
    /// indexed. The lookup is a plain index read; it does not count as
    /// activity for expiration purposes.
    #[must_use]
    pub fn debug_state(
        &self,
        conference_id: Option<&str>,
        endpoint_id: Option<&str>,
        full: bool,
    ) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(
            "shutdownInProgress".to_string(),
            self.is_shutdown_in_progress().into(),
        );
        map.insert("drain".to_string(), self.drain_mode().into());
        map.insert(
            "time".to_string(),
            chrono::Utc::now().timestamp_millis().into(),
        );
        map.insert("load-management".to_string(), self.load_manager.stats());
        map.insert(
            "overall_bridge_jitter".to_string(),
            self.statistics.bridge_jitter().into(),
        );

        let mut conferences = serde_json::Map::new();
        match conference_id {
            None => {
                for conference in self.registry.list() {
                    conferences.insert(
                        conference.id().to_string(),
                        conference.debug_state(false, None),
                    );
                }
            }
            Some(id) => {
                let value = self
                    .registry
                    .get(id)
                    .map_or_else(
                        || serde_json::Value::String("null".to_string()),
                        |c| c.debug_state(full, endpoint_id),
                    );
                conferences.insert(id.to_string(), value);
            }
        }
        map.insert("conferences".to_string(), serde_json::Value::Object(conferences));

        serde_json::Value::Object(map)
    }

    /// Statistics for the packet/message queues this bridge uses.
    #[must_use]
    pub fn queue_stats(&self) -> serde_json::Value {
        queues::snapshot()
    }

    fn resolve_v1(&self, iq: &ConferenceRequest) -> Result<Arc<Conference>, BridgeError> {
        match &iq.id {
            Some(id) => self
                .registry
                .get(id)
                .ok_or_else(|| BridgeError::NotFound(id.clone())),
            None => {
                if self.shutdown.is_shutdown_in_progress() {
                    return Err(BridgeError::GracefulShutdown);
                }

                let name = match &iq.name {
                    Some(raw) => Some(
                        EntityBareJid::parse(raw)
                            .map_err(|_| BridgeError::InvalidName(raw.clone()))?,
                    ),
                    None => None,
                };
                let params = ConferenceParams {
                    name,
                    gid: iq.gid.unwrap_or(GID_NOT_SET),
                    meeting_id: iq.meeting_id.clone(),
                    rtcstats_enabled: iq.rtcstats_enabled,
                    callstats_enabled: iq.callstats_enabled,
                };
                let conference = self.registry.create(&params, false)?;
                self.conference_created(&conference);
                Ok(conference)
            }
        }
    }

    fn resolve_v2(&self, iq: &ConferenceModifyRequest) -> Result<Arc<Conference>, BridgeError> {
        let outcome = self
            .registry
            .get_or_create_by_meeting_id(iq, self.shutdown.is_shutdown_in_progress())?;
        let conference = Arc::clone(outcome.conference());
        if outcome.was_created() {
            self.conference_created(&conference);
        }
        Ok(conference)
    }

    /// Post-creation bookkeeping, run after the registry mutex has been
    /// released and before any request can be dispatched into the
    /// conference.
    fn conference_created(&self, conference: &Arc<Conference>) {
        self.statistics
            .total_conferences_created
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("bridge_conferences_created_total").increment(1);

        info!(
            target: "bridge.registry",
            conference_id = %conference.id(),
            gid = conference.gid(),
            meeting_id = ?conference.meeting_id(),
            "create_conf"
        );

        self.event_emitter
            .fire(|handler| handler.conference_created(conference));
    }

    fn health_probe(&self) -> Result<(), String> {
        let tasks = self.tasks_lock();
        if let Some(sweeper) = &tasks.sweeper {
            if sweeper.is_finished() {
                return Err("expiration sweeper is not running".to_string());
            }
        }
        if let Some(sampler) = &tasks.sampler {
            if sampler.is_finished() {
                return Err("load sampler is not running".to_string());
            }
        }
        Ok(())
    }

    fn tasks_lock(&self) -> std::sync::MutexGuard<'_, BackgroundTasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
