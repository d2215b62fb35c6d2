//! Per-mission cancellation tokens.
//!
//! Each worker registers a `CancelToken`. Calling `cancel()` signals the
//! worker to stop the current turn cleanly; workers both poll
//! (`is_cancelled`) between stream events and await (`cancelled`) while
//! suspended on a waiter or an empty queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct CancelInner {
    cancelled: AtomicBool,
    /// Set when the controller that requested the stop performs the
    /// status transition itself; the worker then skips its quiesce.
    takeover: AtomicBool,
    notify: Notify,
}

/// A cancellation token shared between the worker and its controllers.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                takeover: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation and wake every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Cancel, with the caller taking over the mission's status
    /// transition (used by terminal `set_status` so the worker does not
    /// race it to `interrupted`).
    pub fn cancel_for_takeover(&self) {
        self.inner.takeover.store(true, Ordering::Release);
        self.cancel();
    }

    pub fn is_takeover(&self) -> bool {
        self.inner.takeover.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the active cancellation token per mission id.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a fresh token for a mission's worker.
    pub fn register(&self, mission_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(mission_id.to_owned(), token.clone());
        token
    }

    /// Cancel a mission's worker. Returns true if a token was found.
    pub fn cancel(&self, mission_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(mission_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Cancel with the status transition taken over by the caller.
    pub fn cancel_for_takeover(&self, mission_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(mission_id) {
            token.cancel_for_takeover();
            true
        } else {
            false
        }
    }

    /// Remove the token (called when the worker exits).
    pub fn remove(&self, mission_id: &str) {
        self.tokens.lock().remove(mission_id);
    }

    /// Whether a worker is registered for this mission.
    pub fn is_registered(&self, mission_id: &str) -> bool {
        self.tokens.lock().contains_key(mission_id)
    }
}
