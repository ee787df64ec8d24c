//! Synchronous conference lifecycle events.
//!
//! Handlers run on the thread that triggered the registry mutation, after
//! the registry mutex has been released. A handler may therefore read
//! registry snapshots freely, but must not block for long: it is on the
//! request path.

use crate::conference::Conference;
use std::sync::{Arc, Mutex, PoisonError};

/// Observer of conference lifecycle events.
#[allow(unused_variables)]
pub trait EventHandler: Send + Sync {
    /// A conference was created and indexed. Fired before any request is
    /// dispatched into it.
    fn conference_created(&self, conference: &Arc<Conference>) {}

    /// A conference expired: `expire()` has returned and the conference is
    /// absent from both indices.
    fn conference_expired(&self, conference: &Arc<Conference>) {}
}

/// Synchronous fan-out to a dynamic handler list.
///
/// The list is copied before iteration, so a handler may add or remove
/// handlers (itself included) without deadlocking.
#[derive(Default)]
pub struct SyncEventEmitter {
    handlers: Mutex<Vec<Arc<dyn EventHandler>>>,
}

impl SyncEventEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.lock().push(handler);
    }

    /// Remove a previously added handler (matched by identity).
    pub fn remove_handler(&self, handler: &Arc<dyn EventHandler>) {
        self.lock().retain(|h| !Arc::ptr_eq(h, handler));
    }

    /// Invoke `f` for every registered handler.
    pub fn fire(&self, f: impl Fn(&dyn EventHandler)) {
        let handlers = self.lock().clone();
        for handler in handlers {
            f(handler.as_ref());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn EventHandler>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
