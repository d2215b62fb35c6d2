//! Parallel admission control.
//!
//! At most `max_parallel_missions` workers run a turn at once. A fair
//! (FIFO) semaphore hands out slots: a worker whose queue has work first
//! reports `queued`, then holds a permit for the whole turn. Idle workers
//! hold nothing and are invisible in snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use mc_domain::error::{Error, Result};
use mc_domain::mission::WorkerState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker bookkeeping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Worker task phase, distinct from mission status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Waiting on an empty queue; holds no slot.
    Idle,
    /// Has work, waiting for a scheduler slot.
    Queued,
    /// Turn in flight.
    Running,
    /// Suspended on a tool-call waiter.
    WaitingForTool,
}

impl WorkerPhase {
    /// Snapshot vocabulary; `Idle` workers do not appear in snapshots.
    fn as_state(self) -> Option<WorkerState> {
        match self {
            Self::Idle => None,
            Self::Queued => Some(WorkerState::Queued),
            Self::Running => Some(WorkerState::Running),
            Self::WaitingForTool => Some(WorkerState::WaitingForTool),
        }
    }
}

struct WorkerEntry {
    phase: WorkerPhase,
    current_activity: Option<String>,
    last_heartbeat: DateTime<Utc>,
    handle: Option<JoinHandle<()>>,
}

/// One row of `running_snapshot`, before enrichment by the control layer.
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub mission_id: String,
    pub state: WorkerState,
    pub current_activity: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ParallelScheduler {
    permits: Arc<Semaphore>,
    workers: RwLock<HashMap<String, WorkerEntry>>,
}

impl ParallelScheduler {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a worker task for a mission. Returns false if one is
    /// already registered (the caller must not spawn a second).
    pub fn register_worker(&self, mission_id: &str) -> bool {
        let mut workers = self.workers.write();
        if workers.contains_key(mission_id) {
            return false;
        }
        workers.insert(
            mission_id.to_owned(),
            WorkerEntry {
                phase: WorkerPhase::Idle,
                current_activity: None,
                last_heartbeat: Utc::now(),
                handle: None,
            },
        );
        true
    }

    /// Attach the spawned task handle (awaited at shutdown).
    pub fn attach_handle(&self, mission_id: &str, handle: JoinHandle<()>) {
        if let Some(entry) = self.workers.write().get_mut(mission_id) {
            entry.handle = Some(handle);
        }
    }

    /// Remove a worker's bookkeeping when its task exits.
    pub fn unregister_worker(&self, mission_id: &str) {
        self.workers.write().remove(mission_id);
    }

    pub fn has_worker(&self, mission_id: &str) -> bool {
        self.workers.read().contains_key(mission_id)
    }

    /// Wait for a turn slot. Requests are served in FIFO order; the
    /// worker reports `queued` until admitted.
    pub async fn acquire_slot(&self, mission_id: &str) -> Result<OwnedSemaphorePermit> {
        self.set_phase(mission_id, WorkerPhase::Queued);
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Capacity("scheduler closed".into()))?;
        self.set_phase(mission_id, WorkerPhase::Running);
        Ok(permit)
    }

    pub fn set_phase(&self, mission_id: &str, phase: WorkerPhase) {
        let mut workers = self.workers.write();
        if let Some(entry) = workers.get_mut(mission_id) {
            entry.phase = phase;
            entry.last_heartbeat = Utc::now();
            if phase == WorkerPhase::Idle {
                entry.current_activity = None;
            }
        }
    }

    pub fn set_activity(&self, mission_id: &str, activity: Option<String>) {
        let mut workers = self.workers.write();
        if let Some(entry) = workers.get_mut(mission_id) {
            entry.current_activity = activity;
            entry.last_heartbeat = Utc::now();
        }
    }

    /// Stamp liveness without changing phase.
    pub fn heartbeat(&self, mission_id: &str) {
        let mut workers = self.workers.write();
        if let Some(entry) = workers.get_mut(mission_id) {
            entry.last_heartbeat = Utc::now();
        }
    }

    pub fn last_heartbeat(&self, mission_id: &str) -> Option<DateTime<Utc>> {
        self.workers.read().get(mission_id).map(|e| e.last_heartbeat)
    }

    /// Non-idle workers, for `running_snapshot`.
    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .read()
            .iter()
            .filter_map(|(id, entry)| {
                entry.phase.as_state().map(|state| WorkerSnapshot {
                    mission_id: id.clone(),
                    state,
                    current_activity: entry.current_activity.clone(),
                    last_heartbeat: entry.last_heartbeat,
                })
            })
            .collect()
    }

    /// Detach one worker's handle so the caller can join it.
    pub fn take_handle(&self, mission_id: &str) -> Option<JoinHandle<()>> {
        self.workers
            .write()
            .get_mut(mission_id)
            .and_then(|entry| entry.handle.take())
    }

    /// Detach every worker handle (shutdown joins them after signalling).
    pub fn take_handles(&self) -> Vec<JoinHandle<()>> {
        self.workers
            .write()
            .values_mut()
            .filter_map(|entry| entry.handle.take())
            .collect()
    }

    /// Refuse further admissions; queued acquires fail with `Capacity`.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
