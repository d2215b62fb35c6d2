//! Stall detection.
//!
//! A single periodic task walks non-idle workers and computes
//! `seconds_since_activity = now - max(last_event, worker_heartbeat)`.
//! Level changes are committed as `progress` events with health metadata
//! (debounced: one event per transition); snapshots report the same
//! levels on pull.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use tokio::task::JoinHandle;

use mc_domain::config::RuntimeConfig;
use mc_domain::event::EventDraft;
use mc_domain::mission::HealthLevel;

use crate::state::AppState;

use super::commit;

/// Age of the freshest sign of life, in seconds.
pub fn seconds_since_activity(
    now: DateTime<Utc>,
    last_event: Option<DateTime<Utc>>,
    heartbeat: Option<DateTime<Utc>>,
) -> u64 {
    let freshest = match (last_event, heartbeat) {
        (Some(e), Some(h)) => e.max(h),
        (Some(e), None) => e,
        (None, Some(h)) => h,
        (None, None) => return 0,
    };
    (now - freshest).num_seconds().max(0) as u64
}

/// Classify a mission's health.
///
/// `degraded` is the one level the thresholds do not pin down: the event
/// log is stale past the warn threshold while the worker heartbeat is
/// still fresh (alive but producing nothing). The stalled levels go by
/// the combined activity age.
pub fn health_for(
    cfg: &RuntimeConfig,
    activity_age: u64,
    event_age: Option<u64>,
) -> HealthLevel {
    if activity_age >= cfg.stall_severe_seconds {
        HealthLevel::StalledSevere
    } else if activity_age >= cfg.stall_warn_seconds {
        HealthLevel::StalledWarn
    } else if event_age.is_some_and(|age| age >= cfg.stall_warn_seconds) {
        HealthLevel::Degraded
    } else {
        HealthLevel::Ok
    }
}

/// Spawn the detector task. Ticks every `stall_tick_seconds`; exits on
/// shutdown.
pub fn spawn_stall_detector(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tick = std::time::Duration::from_secs(state.config.runtime.stall_tick_seconds.max(1));
        let mut reported: HashMap<String, HealthLevel> = HashMap::new();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = state.shutdown.cancelled() => return,
            }

            let now = Utc::now();
            let workers = state.scheduler.snapshot();
            reported.retain(|id, _| workers.iter().any(|w| w.mission_id == *id));

            for worker in workers {
                let last_event = state.events.last_event_time(&worker.mission_id);
                let age = seconds_since_activity(now, last_event, Some(worker.last_heartbeat));
                let event_age =
                    last_event.map(|t| (now - t).num_seconds().max(0) as u64);
                let level = health_for(&state.config.runtime, age, event_age);

                let previous = reported
                    .insert(worker.mission_id.clone(), level)
                    .unwrap_or(HealthLevel::Ok);
                if level == previous {
                    continue;
                }

                if level > HealthLevel::Ok {
                    tracing::warn!(
                        mission_id = %worker.mission_id,
                        health = level.as_str(),
                        seconds_since_activity = age,
                        "mission health changed"
                    );
                }
                let draft = EventDraft::progress("")
                    .with_meta("health", json!(level.as_str()))
                    .with_meta("seconds_since_activity", json!(age));
                if let Err(e) = commit(&state, &worker.mission_id, draft) {
                    tracing::warn!(
                        mission_id = %worker.mission_id,
                        error = %e,
                        "failed to publish health change"
                    );
                }
            }
        }
    })
}
