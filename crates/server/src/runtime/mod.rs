//! Core runtime: the commit path, worker lifecycle, and the shared
//! helpers that tie the registry, event store, bus and scheduler into
//! one deterministic loop.
//!
//! Entry points: [`commit`] (append-then-publish), [`ensure_worker`]
//! (spawn the mission's agent loop), [`end_mission`] (status transition
//! plus its `mission_status_changed` event).

pub mod cancel;
pub mod scheduler;
pub mod stall;
pub mod waiters;
pub mod worker;

use mc_domain::error::Result;
use mc_domain::event::{EventDraft, StoredEvent};
use mc_domain::mission::{Mission, MissionStatus};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Commit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Commit an event: append to the store, then publish on the bus. The
/// pair is the commit point; subscribers never see an event that is not
/// durable.
pub fn commit(state: &AppState, mission_id: &str, draft: EventDraft) -> Result<StoredEvent> {
    let event = state.events.append(mission_id, draft)?;
    state.bus.publish(&event);
    state.registry.touch(mission_id);
    state.scheduler.heartbeat(mission_id);
    Ok(event)
}

/// Apply a status transition and commit its `mission_status_changed`
/// event in one step.
pub fn end_mission(
    state: &AppState,
    mission_id: &str,
    to: MissionStatus,
    reason: Option<&str>,
) -> Result<Mission> {
    let (from, mission) = state.registry.set_status(mission_id, to)?;
    commit(
        state,
        mission_id,
        EventDraft::status_changed(Some(from.as_str()), to.as_str(), reason),
    )?;
    Ok(mission)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ensure a worker task exists for a mission. Idempotent; the worker
/// idles on the queue until there is a turn to run.
pub fn ensure_worker(state: &AppState, mission_id: &str) {
    if !state.scheduler.register_worker(mission_id) {
        return;
    }
    let handle = tokio::spawn(worker::run_worker(state.clone(), mission_id.to_owned()));
    state.scheduler.attach_handle(mission_id, handle);
    tracing::debug!(mission_id, "worker spawned");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Truncate to a display preview, respecting char boundaries.
pub fn truncate_str(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
