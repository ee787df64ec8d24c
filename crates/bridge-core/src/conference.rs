//! Conference handle and ingress worker.
//!
//! The core treats each conference as an opaque actor: routing hands a
//! request to the conference's FIFO ingress queue and returns immediately;
//! a dedicated worker task drains the queue and produces replies, so a slow
//! conference never blocks requests headed for its neighbours.
//!
//! Everything media-related (endpoints, RTP machinery, per-endpoint state)
//! lives outside the core; this type carries only the identity, the queue,
//! the expiration state and the gauges the core itself needs.

use crate::clock::Clock;
use crate::queues;
use bridge_signaling::{
    ConferenceModifiedResult, ConferenceResult, EntityBareJid, InboundRequest, SignalingReply,
    SignalingRequest, GID_NOT_SET,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::BridgeError;

/// Construction parameters for a conference.
#[derive(Debug, Clone)]
pub struct ConferenceParams {
    pub name: Option<EntityBareJid>,
    pub gid: i64,
    pub meeting_id: Option<String>,
    pub rtcstats_enabled: bool,
    pub callstats_enabled: bool,
}

/// A live conference: identity plus the ingress queue contract.
pub struct Conference {
    id: String,
    gid: i64,
    meeting_id: Option<String>,
    name: Option<EntityBareJid>,
    rtcstats_enabled: bool,
    callstats_enabled: bool,
    created_at_millis: u64,

    ingress: mpsc::UnboundedSender<InboundRequest>,
    cancel_token: CancellationToken,
    expired: AtomicBool,
    pending_requests: AtomicUsize,
    requests_processed: AtomicU64,

    /// Current packet rate over this conference, written by the media plane
    /// and read by the bridge-wide load sampler.
    packet_rate_pps: AtomicU64,
    /// Endpoint ids registered by the media plane.
    endpoints: Mutex<BTreeSet<String>>,
    last_activity_millis: AtomicU64,
    inactivity_timeout: Duration,
    clock: Arc<dyn Clock>,
    ingress_metrics: Arc<queues::QueueMetrics>,
}

impl Conference {
    /// Create the conference and spawn its ingress worker.
    pub(crate) fn spawn(
        id: String,
        params: &ConferenceParams,
        inactivity_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let now = clock.wall_clock_millis();

        let conference = Arc::new(Self {
            id,
            gid: params.gid,
            meeting_id: params.meeting_id.clone(),
            name: params.name.clone(),
            rtcstats_enabled: params.rtcstats_enabled,
            callstats_enabled: params.callstats_enabled,
            created_at_millis: now,
            ingress: sender,
            cancel_token: CancellationToken::new(),
            expired: AtomicBool::new(false),
            pending_requests: AtomicUsize::new(0),
            requests_processed: AtomicU64::new(0),
            packet_rate_pps: AtomicU64::new(0),
            endpoints: Mutex::new(BTreeSet::new()),
            last_activity_millis: AtomicU64::new(now),
            inactivity_timeout,
            clock,
            ingress_metrics: queues::queue_metrics(queues::SIGNALING_QUEUE),
        });

        tokio::spawn(Arc::clone(&conference).run(receiver));

        conference
    }

    /// Bridge-local conference id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Externally supplied meeting id, if any.
    #[must_use]
    pub fn meeting_id(&self) -> Option<&str> {
        self.meeting_id.as_deref()
    }

    /// Legacy numeric global id ([`GID_NOT_SET`] when absent).
    #[must_use]
    pub fn gid(&self) -> i64 {
        self.gid
    }

    /// Addressable conference name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&EntityBareJid> {
        self.name.as_ref()
    }

    #[must_use]
    pub fn rtcstats_enabled(&self) -> bool {
        self.rtcstats_enabled
    }

    #[must_use]
    pub fn callstats_enabled(&self) -> bool {
        self.callstats_enabled
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    /// Seconds this conference has been alive.
    #[must_use]
    pub fn duration_seconds(&self) -> u64 {
        self.clock
            .wall_clock_millis()
            .saturating_sub(self.created_at_millis)
            / 1000
    }

    /// Non-blocking hand-off of a request to this conference's queue.
    ///
    /// The conference becomes responsible for producing the reply. When the
    /// worker is already gone (the conference expired concurrently), the
    /// request is answered with a not-found error instead of being dropped.
    pub fn enqueue(&self, request: InboundRequest) {
        self.pending_requests.fetch_add(1, Ordering::Relaxed);
        self.ingress_metrics.record_added();

        if let Err(send_error) = self.ingress.send(request) {
            self.pending_requests.fetch_sub(1, Ordering::Relaxed);
            self.ingress_metrics.record_dropped();
            warn!(
                target: "bridge.conference",
                conference_id = %self.id,
                "Request arrived for an expired conference"
            );

            let InboundRequest { request, respond } = send_error.0;
            let reply = SignalingReply::Error(
                BridgeError::NotFound(self.id.clone()).to_error_reply(request.dialect()),
            );
            respond(reply);
        }
    }

    /// Process a request inline and return the reply (test dispatch path).
    #[must_use]
    pub fn handle_sync(&self, request: &SignalingRequest) -> SignalingReply {
        self.apply(request)
    }

    /// Terminal, idempotent expiration. Stops the ingress worker.
    ///
    /// Invoked by the registry after the conference has been removed from
    /// both indices; never called with the registry mutex held.
    pub fn expire(&self) {
        if self.expired.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(
            target: "bridge.conference",
            conference_id = %self.id,
            meeting_id = ?self.meeting_id,
            duration_seconds = self.duration_seconds(),
            requests_processed = self.requests_processed.load(Ordering::Relaxed),
            "Conference expired"
        );

        self.cancel_token.cancel();
    }

    /// Whether the expiration sweeper should expire this conference: no
    /// endpoints and no signaling activity past the inactivity timeout.
    #[must_use]
    pub fn should_expire(&self) -> bool {
        if self.is_expired() || self.endpoint_count() > 0 {
            return false;
        }
        let idle_millis = self
            .clock
            .wall_clock_millis()
            .saturating_sub(self.last_activity_millis.load(Ordering::SeqCst));
        idle_millis > u64::try_from(self.inactivity_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Register an endpoint (media plane hook).
    pub fn add_endpoint(&self, endpoint_id: impl Into<String>) {
        self.endpoints_lock().insert(endpoint_id.into());
        self.touch();
    }

    /// Deregister an endpoint (media plane hook).
    pub fn remove_endpoint(&self, endpoint_id: &str) {
        self.endpoints_lock().remove(endpoint_id);
        self.touch();
    }

    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints_lock().len()
    }

    /// Update the packet-rate gauge (media plane hook).
    pub fn set_packet_rate_pps(&self, pps: u64) {
        self.packet_rate_pps.store(pps, Ordering::Relaxed);
    }

    #[must_use]
    pub fn packet_rate_pps(&self) -> u64 {
        self.packet_rate_pps.load(Ordering::Relaxed)
    }

    /// Ordered-map projection of this conference for the debug surface.
    ///
    /// Reading this state is not activity: it does not refresh the
    /// inactivity clock used by the expiration sweeper.
    #[must_use]
    pub fn debug_state(&self, full: bool, endpoint_id: Option<&str>) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("id".to_string(), self.id.clone().into());
        map.insert(
            "name".to_string(),
            self.name.as_ref().map(ToString::to_string).into(),
        );
        map.insert("meeting_id".to_string(), self.meeting_id.clone().into());
        map.insert("gid".to_string(), self.gid.into());
        map.insert("expired".to_string(), self.is_expired().into());
        map.insert(
            "endpoint_count".to_string(),
            self.endpoint_count().into(),
        );
        map.insert(
            "packet_rate_pps".to_string(),
            self.packet_rate_pps().into(),
        );

        if full {
            map.insert(
                "rtcstats_enabled".to_string(),
                self.rtcstats_enabled.into(),
            );
            map.insert(
                "callstats_enabled".to_string(),
                self.callstats_enabled.into(),
            );
            map.insert(
                "created_at_millis".to_string(),
                self.created_at_millis.into(),
            );
            map.insert(
                "pending_requests".to_string(),
                self.pending_requests.load(Ordering::Relaxed).into(),
            );
            map.insert(
                "requests_processed".to_string(),
                self.requests_processed.load(Ordering::Relaxed).into(),
            );
            let endpoints: Vec<serde_json::Value> = self
                .endpoints_lock()
                .iter()
                .filter(|id| endpoint_id.map_or(true, |wanted| id.as_str() == wanted))
                .map(|id| id.clone().into())
                .collect();
            map.insert("endpoints".to_string(), endpoints.into());
        }

        serde_json::Value::Object(map)
    }

    async fn run(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<InboundRequest>) {
        debug!(
            target: "bridge.conference",
            conference_id = %self.id,
            "Conference ingress worker started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                msg = receiver.recv() => match msg {
                    Some(InboundRequest { request, respond }) => {
                        self.pending_requests.fetch_sub(1, Ordering::Relaxed);
                        let reply = self.apply(&request);
                        respond(reply);
                    }
                    None => break,
                }
            }
        }

        debug!(
            target: "bridge.conference",
            conference_id = %self.id,
            requests_processed = self.requests_processed.load(Ordering::Relaxed),
            "Conference ingress worker stopped"
        );
    }

    /// Build the reply for one request. Shared by the worker and the sync
    /// dispatch path.
    fn apply(&self, request: &SignalingRequest) -> SignalingReply {
        self.touch();
        self.requests_processed.fetch_add(1, Ordering::Relaxed);

        match request {
            SignalingRequest::Conference(_) => SignalingReply::Conference(ConferenceResult {
                id: self.id.clone(),
                gid: (self.gid != GID_NOT_SET).then_some(self.gid),
                name: self.name.as_ref().map(ToString::to_string),
                meeting_id: self.meeting_id.clone(),
            }),
            SignalingRequest::ConferenceModify(iq) => {
                SignalingReply::ConferenceModified(ConferenceModifiedResult {
                    meeting_id: iq.meeting_id.clone(),
                    conference_id: self.id.clone(),
                })
            }
            SignalingRequest::HealthCheck | SignalingRequest::Version => SignalingReply::Error(
                BridgeError::BadRequest("unsupported element for a conference".to_string())
                    .to_error_reply(request.dialect()),
            ),
        }
    }

    fn touch(&self) {
        self.last_activity_millis
            .store(self.clock.wall_clock_millis(), Ordering::SeqCst);
    }

    fn endpoints_lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Conference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conference")
            .field("id", &self.id)
            .field("meeting_id", &self.meeting_id)
            .field("gid", &self.gid)
            .field("expired", &self.is_expired())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;
    use crate::clock::SystemClock;
    use bridge_signaling::{ConferenceModifyRequest, ConferenceRequest};
    use std::sync::Mutex as StdMutex;

    fn test_params(meeting_id: Option<&str>) -> ConferenceParams {
        ConferenceParams {
            name: None,
            gid: GID_NOT_SET,
            meeting_id: meeting_id.map(ToString::to_string),
            rtcstats_enabled: false,
            callstats_enabled: false,
        }
    }

    fn spawn_test_conference(clock: Arc<dyn Clock>) -> Arc<Conference> {
        Conference::spawn(
            "c0ffee".to_string(),
            &test_params(Some("m-1")),
            Duration::from_secs(90),
            clock,
        )
    }

    #[tokio::test]
    async fn test_handle_sync_echoes_identity() {
        let conference = spawn_test_conference(Arc::new(SystemClock));

        let reply = conference.handle_sync(&SignalingRequest::Conference(
            ConferenceRequest::default(),
        ));
        match reply {
            SignalingReply::Conference(result) => {
                assert_eq!(result.id, "c0ffee");
                assert_eq!(result.meeting_id.as_deref(), Some("m-1"));
                assert!(result.gid.is_none());
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        let reply = conference.handle_sync(&SignalingRequest::ConferenceModify(
            ConferenceModifyRequest::lookup("m-1"),
        ));
        match reply {
            SignalingReply::ConferenceModified(result) => {
                assert_eq!(result.conference_id, "c0ffee");
                assert_eq!(result.meeting_id, "m-1");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_enqueued_requests_are_processed_in_order() {
        let conference = spawn_test_conference(Arc::new(SystemClock));

        let seen: Arc<StdMutex<Vec<usize>>> = Arc::new(StdMutex::new(Vec::new()));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let mut done_tx = Some(done_tx);

        for i in 0..5 {
            let seen = Arc::clone(&seen);
            let done = if i == 4 { done_tx.take() } else { None };
            conference.enqueue(InboundRequest::new(
                SignalingRequest::Conference(ConferenceRequest::default()),
                move |_reply| {
                    seen.lock().unwrap().push(i);
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                },
            ));
        }

        done_rx.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_expire_is_idempotent() {
        let conference = spawn_test_conference(Arc::new(SystemClock));

        assert!(!conference.is_expired());
        conference.expire();
        assert!(conference.is_expired());
        // Second call is a no-op.
        conference.expire();
        assert!(conference.is_expired());
    }

    #[tokio::test]
    async fn test_enqueue_after_expire_replies_not_found() {
        let conference = spawn_test_conference(Arc::new(SystemClock));
        conference.expire();

        // Give the worker a moment to observe cancellation and drop the
        // receiver, closing the channel.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        conference.enqueue(InboundRequest::new(
            SignalingRequest::Conference(ConferenceRequest::default()),
            move |reply| {
                let _ = tx.send(reply);
            },
        ));

        let reply = rx.await.unwrap();
        let error = reply.error().expect("expected an error reply");
        assert_eq!(
            error.condition,
            bridge_signaling::ErrorCondition::BadRequest
        );
    }

    #[tokio::test]
    async fn test_should_expire_tracks_endpoints_and_idleness() {
        let clock = Arc::new(ManualClock::at(1_000_000));
        let conference = Conference::spawn(
            "c0ffee".to_string(),
            &test_params(None),
            Duration::from_secs(90),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );

        // Fresh conference: not idle long enough.
        assert!(!conference.should_expire());

        // Idle past the timeout with no endpoints: expirable.
        clock.advance(91_000);
        assert!(conference.should_expire());

        // An endpoint keeps it alive regardless of idleness.
        conference.add_endpoint("ep-1");
        clock.advance(1_000_000);
        assert!(!conference.should_expire());

        conference.remove_endpoint("ep-1");
        clock.advance(91_000);
        assert!(conference.should_expire());
    }

    #[tokio::test]
    async fn test_debug_state_shallow_and_full() {
        let conference = spawn_test_conference(Arc::new(SystemClock));
        conference.add_endpoint("ep-1");
        conference.add_endpoint("ep-2");

        let shallow = conference.debug_state(false, None);
        assert_eq!(shallow["id"], "c0ffee");
        assert_eq!(shallow["endpoint_count"], 2);
        assert!(shallow.get("endpoints").is_none());

        let full = conference.debug_state(true, None);
        assert_eq!(full["endpoints"].as_array().unwrap().len(), 2);

        let scoped = conference.debug_state(true, Some("ep-2"));
        assert_eq!(scoped["endpoints"].as_array().unwrap().len(), 1);
        assert_eq!(scoped["endpoints"][0], "ep-2");
    }
}
