//! Boundary operations.
//!
//! [`MissionControl`] is the transport-agnostic surface the HTTP/SSE
//! layer (an external collaborator) calls into. Every operation
//! validates its inputs (`Protocol` errors never mutate state), then
//! drives the registry, queue, store, bus and workers.

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use mc_domain::error::{Error, Result};
use mc_domain::event::{EventDraft, EventType, StoredEvent};
use mc_domain::ident::validate_id;
use mc_domain::mission::{
    CreateMissionParams, HealthLevel, Mission, MissionStatus, WorkerState,
};
use mc_domain::queue::QueuedMessage;
use mc_domain::stream::BoxStream;

use crate::runtime::{commit, end_mission, ensure_worker, stall};
use crate::state::AppState;
use crate::subscribe::{self, SubscriptionFilter, SubscriptionItem};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot row
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One running mission as reported by `running_missions`.
#[derive(Debug, Clone, Serialize)]
pub struct RunningMissionSnapshot {
    pub mission_id: String,
    pub state: WorkerState,
    pub queue_len: usize,
    pub history_len: i64,
    pub seconds_since_activity: u64,
    pub health: HealthLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_activity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub expected_deliverables: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Facade
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct MissionControl {
    state: AppState,
}

impl MissionControl {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    // ── Missions ──────────────────────────────────────────────────────

    /// Create a mission; emits `mission_status_changed{to:active}` as its
    /// first event and spawns the worker.
    pub fn create_mission(&self, params: CreateMissionParams) -> Result<Mission> {
        let mission = self.state.registry.create(params)?;
        self.state.events.register_mission(&mission.id)?;
        commit(
            &self.state,
            &mission.id,
            EventDraft::status_changed(None, MissionStatus::Active.as_str(), None),
        )?;
        ensure_worker(&self.state, &mission.id);
        Ok(mission)
    }

    pub fn get_mission(&self, id: &str) -> Result<Mission> {
        validate_id("mission", id)?;
        self.state.registry.get(id)
    }

    /// All missions, ordered by `updated_at` descending.
    pub fn list_missions(&self) -> Vec<Mission> {
        self.state.registry.list()
    }

    /// Snapshot of every non-idle worker, enriched with queue, history,
    /// activity and health.
    pub fn running_missions(&self) -> Vec<RunningMissionSnapshot> {
        let now = Utc::now();
        self.state
            .scheduler
            .snapshot()
            .into_iter()
            .map(|worker| {
                let mission = self.state.registry.get(&worker.mission_id).ok();
                let last_event = self.state.events.last_event_time(&worker.mission_id);
                let age = stall::seconds_since_activity(
                    now,
                    last_event,
                    Some(worker.last_heartbeat),
                );
                let event_age = last_event.map(|t| (now - t).num_seconds().max(0) as u64);
                RunningMissionSnapshot {
                    queue_len: self.state.queue.len(&worker.mission_id),
                    history_len: self
                        .state
                        .events
                        .last_sequence(&worker.mission_id)
                        .unwrap_or(0),
                    seconds_since_activity: age,
                    health: stall::health_for(&self.state.config.runtime, age, event_age),
                    current_activity: worker.current_activity,
                    title: mission.as_ref().and_then(|m| m.title.clone()),
                    expected_deliverables: mission
                        .map(|m| m.expected_deliverables)
                        .unwrap_or_default(),
                    state: worker.state,
                    mission_id: worker.mission_id,
                }
            })
            .collect()
    }

    /// Apply a status transition. Terminal transitions stop the worker
    /// first so the `mission_status_changed` event is the mission's last.
    pub async fn set_mission_status(
        &self,
        id: &str,
        to: MissionStatus,
        reason: Option<&str>,
    ) -> Result<Mission> {
        validate_id("mission", id)?;
        let mission = self.state.registry.get(id)?;

        if to == MissionStatus::Active {
            return self.resume_mission(id, true);
        }
        // Surface InvalidTransition before touching the worker.
        mission.status.check_transition(to)?;

        self.stop_worker_for_takeover(id).await;
        let mission = end_mission(&self.state, id, to, reason)?;
        if to == MissionStatus::NotFeasible {
            // Truly final: live subscribers get a clean end of stream.
            self.state.bus.cleanup(id);
        }
        Ok(mission)
    }

    /// Resume a mission. A no-op when already active (no second event);
    /// otherwise transitions to active and, unless `skip_message`, queues
    /// a synthetic "MISSION RESUMED" message as the turn trigger.
    pub fn resume_mission(&self, id: &str, skip_message: bool) -> Result<Mission> {
        validate_id("mission", id)?;
        let (outcome, mission) = self.state.registry.resume(id)?;

        match outcome {
            mc_missions::ResumeOutcome::AlreadyActive => Ok(mission),
            mc_missions::ResumeOutcome::Resumed { from } => {
                self.state.events.register_mission(id)?;
                commit(
                    &self.state,
                    id,
                    EventDraft::status_changed(
                        Some(from.as_str()),
                        MissionStatus::Active.as_str(),
                        Some("resume"),
                    ),
                )?;
                if !skip_message {
                    self.state.queue.enqueue(id, "MISSION RESUMED", None)?;
                }
                ensure_worker(&self.state, id);
                Ok(mission)
            }
        }
    }

    /// Cancel: interrupt the worker, resolve waiters as cancelled, set
    /// status to interrupted. A no-op on already-terminal missions.
    pub async fn cancel_mission(&self, id: &str) -> Result<Mission> {
        validate_id("mission", id)?;
        let mission = self.state.registry.get(id)?;
        if mission.status != MissionStatus::Active {
            return Ok(mission);
        }

        let handle = self.state.scheduler.take_handle(id);
        if self.state.cancel_map.cancel(id) {
            // The worker emits the synthetic tool_results and the
            // interrupted transition itself; wait for it to drain.
            if let Some(handle) = handle {
                let _ = handle.await;
            }
            self.state.registry.get(id)
        } else {
            // Active but no worker (e.g. startup edge): transition directly.
            end_mission(&self.state, id, MissionStatus::Interrupted, Some("cancelled"))
        }
    }

    /// Stop a worker, taking over its status transition.
    async fn stop_worker_for_takeover(&self, id: &str) {
        let handle = self.state.scheduler.take_handle(id);
        if self.state.cancel_map.cancel_for_takeover(id) {
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }
    }

    // ── Messages ──────────────────────────────────────────────────────

    /// Queue a user message. The `user_message` event is emitted when the
    /// worker dequeues it at turn start.
    pub fn post_message(
        &self,
        mission_id: &str,
        content: &str,
        agent: Option<String>,
    ) -> Result<QueuedMessage> {
        validate_id("mission", mission_id)?;
        if content.trim().is_empty() {
            return Err(Error::Protocol("message content must not be empty".into()));
        }
        let mission = self.state.registry.get(mission_id)?;

        let message = self.state.queue.enqueue(mission_id, content, agent)?;
        // Non-active missions keep the message queued for a later resume.
        if mission.status == MissionStatus::Active {
            ensure_worker(&self.state, mission_id);
        }
        Ok(message)
    }

    pub fn list_queue(&self, mission_id: Option<&str>) -> Result<Vec<QueuedMessage>> {
        match mission_id {
            Some(id) => {
                validate_id("mission", id)?;
                Ok(self.state.queue.list(id))
            }
            None => Ok(self.state.queue.list_all()),
        }
    }

    /// Remove a queued message that has not been dequeued yet.
    pub fn remove_from_queue(&self, message_id: &str) -> Result<QueuedMessage> {
        let id = Uuid::parse_str(message_id)
            .map_err(|_| Error::Protocol(format!("malformed message id: {message_id:?}")))?;
        self.state.queue.remove(&id)
    }

    /// Clear a mission's queue; returns the count (0 emits no events).
    pub fn clear_queue(&self, mission_id: &str) -> Result<usize> {
        validate_id("mission", mission_id)?;
        self.state.queue.clear(mission_id)
    }

    // ── Tool results ──────────────────────────────────────────────────

    /// Post a tool result. Releases the waiter; the worker commits the
    /// `tool_result` event. A duplicate post is `NotFound` and appends
    /// nothing, preserving at most one result per call.
    pub fn post_tool_result(
        &self,
        tool_call_id: &str,
        tool_name: Option<String>,
        result: serde_json::Value,
    ) -> Result<()> {
        validate_id("tool_call", tool_call_id)?;
        let content = tool_result_content(&result);
        self.state
            .waiters
            .resolve(tool_call_id, tool_name, content, serde_json::Map::new())
    }

    // ── Events ────────────────────────────────────────────────────────

    /// Durable replay with type filter and pagination.
    pub fn read_events(
        &self,
        mission_id: &str,
        types: Option<&[EventType]>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<StoredEvent>> {
        validate_id("mission", mission_id)?;
        self.state.registry.get(mission_id)?;
        let limit = self.state.config.runtime.clamp_read_limit(limit);
        self.state.events.read_range(mission_id, types, limit, offset)
    }

    /// Open a subscription session: replay from `since_sequence`, then
    /// tail live with keepalives and transparent lag catch-up.
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
        since_sequence: Option<i64>,
    ) -> Result<BoxStream<'static, SubscriptionItem>> {
        subscribe::open(&self.state, filter, since_sequence)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Quiesce: stop admissions, drain workers (each worker's mission
    /// becomes interrupted), flush persistence.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down mission control");
        self.state.scheduler.close();
        self.state.shutdown.cancel();
        for handle in self.state.scheduler.take_handles() {
            let _ = handle.await;
        }
        if let Err(e) = self.state.registry.flush() {
            tracing::warn!(error = %e, "failed to flush mission registry at shutdown");
        }
    }

    /// Spawn the stall detector tick task.
    pub fn spawn_stall_detector(&self) -> tokio::task::JoinHandle<()> {
        stall::spawn_stall_detector(self.state.clone())
    }
}

/// Extract the event content from a posted tool result value.
fn tool_result_content(result: &serde_json::Value) -> String {
    match result {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => match map.get("content") {
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => result.to_string(),
        },
        other => other.to_string(),
    }
}
