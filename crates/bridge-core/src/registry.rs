//! Conference registry: the two cross-linked indices and their invariants.
//!
//! Both indices live behind one mutex. Every mutation that touches either
//! index happens inside a single critical section, so at no point can one
//! index know about a conference the other has already forgotten.
//!
//! Conference ids combine the wall clock with a pseudorandom draw; the
//! random part exists so the create loop never has to wait for the clock to
//! tick over when two creations land in the same millisecond. Uniqueness is
//! enforced by the insertion retry loop, not by the generator.

use crate::clock::Clock;
use crate::conference::{Conference, ConferenceParams};
use crate::errors::BridgeError;
use bridge_signaling::{ConferenceModifyRequest, EntityBareJid, GID_MODIFY_DIALECT};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::warn;

/// Generate a candidate conference id from the wall clock and a random
/// draw. Not guaranteed unique; the caller retries on collision.
pub(crate) fn generate_conference_id(now_millis: u64, rng: &mut dyn RngCore) -> String {
    format!("{:x}", now_millis.wrapping_add(rng.next_u64()))
}

/// Outcome of the dialect-v2 compound resolve.
#[derive(Debug)]
pub enum ModifyOutcome {
    /// The conference already existed for the meeting id.
    Existing(Arc<Conference>),
    /// A new conference was created.
    Created(Arc<Conference>),
}

impl ModifyOutcome {
    #[must_use]
    pub fn conference(&self) -> &Arc<Conference> {
        match self {
            ModifyOutcome::Existing(c) | ModifyOutcome::Created(c) => c,
        }
    }

    #[must_use]
    pub fn was_created(&self) -> bool {
        matches!(self, ModifyOutcome::Created(_))
    }
}

struct RegistryInner {
    by_id: HashMap<String, Arc<Conference>>,
    by_meeting_id: HashMap<String, Arc<Conference>>,
    rng: Box<dyn RngCore + Send>,
}

/// The conference registry.
pub struct ConferenceRegistry {
    inner: Mutex<RegistryInner>,
    clock: Arc<dyn Clock>,
    conference_inactivity_timeout: Duration,
}

impl ConferenceRegistry {
    pub fn new(
        clock: Arc<dyn Clock>,
        rng: Box<dyn RngCore + Send>,
        conference_inactivity_timeout: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                by_id: HashMap::new(),
                by_meeting_id: HashMap::new(),
                rng,
            }),
            clock,
            conference_inactivity_timeout,
        }
    }

    /// Create a conference with a freshly allocated id.
    ///
    /// With `strict_meeting_id` an existing live conference holding the same
    /// meeting id fails the create; without it the collision is tolerated
    /// and the previous `by_meeting_id` entry is left in place (the legacy
    /// dialect has no way to expire the old conference first).
    ///
    /// # Errors
    ///
    /// [`BridgeError::AlreadyExists`] on a strict meeting-id collision.
    pub fn create(
        &self,
        params: &ConferenceParams,
        strict_meeting_id: bool,
    ) -> Result<Arc<Conference>, BridgeError> {
        let mut inner = self.lock();
        self.insert_new(&mut inner, params, strict_meeting_id)
    }

    /// Dialect-v2 resolve: decision and possible create under one critical
    /// section, so a concurrent create for the same meeting id cannot slip
    /// between the lookup and the insert.
    ///
    /// # Errors
    ///
    /// Per the dialect-v2 routing rules: [`BridgeError::AlreadyExists`],
    /// [`BridgeError::GracefulShutdown`], [`BridgeError::InvalidName`] or
    /// [`BridgeError::NotFound`].
    pub fn get_or_create_by_meeting_id(
        &self,
        request: &ConferenceModifyRequest,
        shutdown_in_progress: bool,
    ) -> Result<ModifyOutcome, BridgeError> {
        let mut inner = self.lock();
        let existing = inner.by_meeting_id.get(&request.meeting_id).cloned();

        if request.create {
            if existing.is_some() {
                warn!(
                    target: "bridge.registry",
                    meeting_id = %request.meeting_id,
                    "Will not create conference, conference already exists"
                );
                return Err(BridgeError::AlreadyExists(request.meeting_id.clone()));
            }
            if shutdown_in_progress {
                warn!(
                    target: "bridge.registry",
                    meeting_id = %request.meeting_id,
                    "Will not create conference in shutdown mode"
                );
                return Err(BridgeError::GracefulShutdown);
            }

            let name = match &request.name {
                Some(raw) => Some(
                    EntityBareJid::parse(raw)
                        .map_err(|_| BridgeError::InvalidName(raw.clone()))?,
                ),
                None => None,
            };

            let params = ConferenceParams {
                name,
                gid: GID_MODIFY_DIALECT,
                meeting_id: Some(request.meeting_id.clone()),
                rtcstats_enabled: request.rtcstats_enabled,
                callstats_enabled: request.callstats_enabled,
            };
            let conference = self.insert_new(&mut inner, &params, true)?;
            Ok(ModifyOutcome::Created(conference))
        } else {
            existing.map(ModifyOutcome::Existing).ok_or_else(|| {
                warn!(
                    target: "bridge.registry",
                    meeting_id = %request.meeting_id,
                    "Conference not found"
                );
                BridgeError::NotFound(request.meeting_id.clone())
            })
        }
    }

    /// Snapshot read by bridge-local id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Conference>> {
        self.lock().by_id.get(id).cloned()
    }

    /// Snapshot read by meeting id.
    #[must_use]
    pub fn get_by_meeting_id(&self, meeting_id: &str) -> Option<Arc<Conference>> {
        self.lock().by_meeting_id.get(meeting_id).cloned()
    }

    /// Independent snapshot of the live conference set. The copy is taken
    /// before the mutex is released so callers can iterate safely.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Conference>> {
        self.lock().by_id.values().cloned().collect()
    }

    /// Number of live conferences.
    #[must_use]
    pub fn count(&self) -> usize {
        self.lock().by_id.len()
    }

    /// Remove the conference from both indices in one critical section.
    ///
    /// Returns `true` only for the call that actually removed it: that
    /// caller is the one responsible for invoking `expire()` on the
    /// conference (exactly once) and emitting the expiry event. Removal
    /// only happens when the conference is still the live entry under its
    /// id, so a stale handle for a reused id can never evict its successor.
    #[must_use]
    pub fn remove(&self, conference: &Arc<Conference>) -> bool {
        let mut inner = self.lock();

        let is_live = inner
            .by_id
            .get(conference.id())
            .is_some_and(|live| Arc::ptr_eq(live, conference));
        if !is_live {
            return false;
        }

        inner.by_id.remove(conference.id());
        if let Some(meeting_id) = conference.meeting_id() {
            let holds_entry = inner
                .by_meeting_id
                .get(meeting_id)
                .is_some_and(|live| Arc::ptr_eq(live, conference));
            if holds_entry {
                inner.by_meeting_id.remove(meeting_id);
            }
        }
        true
    }

    /// Allocate an id and insert, retrying while the candidate collides.
    /// Runs entirely under the (already held) registry mutex.
    fn insert_new(
        &self,
        inner: &mut RegistryInner,
        params: &ConferenceParams,
        strict_meeting_id: bool,
    ) -> Result<Arc<Conference>, BridgeError> {
        loop {
            if strict_meeting_id {
                if let Some(meeting_id) = &params.meeting_id {
                    if inner.by_meeting_id.contains_key(meeting_id) {
                        return Err(BridgeError::AlreadyExists(meeting_id.clone()));
                    }
                }
            }

            let id = generate_conference_id(self.clock.wall_clock_millis(), inner.rng.as_mut());
            if inner.by_id.contains_key(&id) {
                continue;
            }

            let conference = Conference::spawn(
                id.clone(),
                params,
                self.conference_inactivity_timeout,
                Arc::clone(&self.clock),
            );
            inner.by_id.insert(id, Arc::clone(&conference));
            if let Some(meeting_id) = conference.meeting_id() {
                inner
                    .by_meeting_id
                    .entry(meeting_id.to_string())
                    .or_insert_with(|| Arc::clone(&conference));
            }
            return Ok(conference);
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
