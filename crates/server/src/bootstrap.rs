//! Startup wiring: build every singleton, recover from a previous crash,
//! and hand back a fully-wired [`AppState`].

use std::sync::Arc;

use anyhow::Context;

use mc_domain::config::Config;
use mc_domain::event::EventDraft;
use mc_domain::mission::MissionStatus;
use mc_missions::{EventStore, MessageQueue, MissionRegistry};
use mc_model::ModelProvider;

use crate::bus::EventBus;
use crate::runtime::cancel::{CancelMap, CancelToken};
use crate::runtime::commit;
use crate::runtime::scheduler::ParallelScheduler;
use crate::runtime::waiters::ToolCallCoordinator;
use crate::state::AppState;

/// Initialize every subsystem and return the shared state.
///
/// Recovery runs before any worker exists: missions persisted as
/// `active` are flipped to `interrupted` (their queued messages survive
/// for a later resume), and each flip is committed to the log so replay
/// stays complete.
pub fn build_state(config: Config, provider: Arc<dyn ModelProvider>) -> anyhow::Result<AppState> {
    config.validate().context("validating config")?;
    let state_path = config.storage.state_path.clone();

    let registry = Arc::new(
        MissionRegistry::new(&state_path).context("initializing mission registry")?,
    );
    let events =
        Arc::new(EventStore::new(&state_path).context("initializing event store")?);
    let queue = Arc::new(
        MessageQueue::new(&state_path, config.runtime.queue_cap)
            .context("initializing message queue")?,
    );

    // Load (and tail-recover) every known mission's log up front.
    for id in registry.ids() {
        events
            .register_mission(&id)
            .with_context(|| format!("loading event log for mission {id}"))?;
    }

    let state = AppState {
        bus: Arc::new(EventBus::new(config.runtime.subscription_buffer)),
        scheduler: Arc::new(ParallelScheduler::new(config.runtime.max_parallel_missions)),
        waiters: Arc::new(ToolCallCoordinator::new()),
        cancel_map: Arc::new(CancelMap::new()),
        shutdown: CancelToken::new(),
        config: Arc::new(config),
        provider,
        registry,
        events,
        queue,
    };

    // Crash-recovery sweep.
    for mission in state
        .registry
        .recover_interrupted()
        .context("recovering interrupted missions")?
    {
        commit(
            &state,
            &mission.id,
            EventDraft::status_changed(
                Some(MissionStatus::Active.as_str()),
                MissionStatus::Interrupted.as_str(),
                Some("server restart"),
            ),
        )
        .with_context(|| format!("recording restart interruption for {}", mission.id))?;
    }

    tracing::info!(
        missions = state.registry.ids().len(),
        max_parallel = state.config.runtime.max_parallel_missions,
        state_path = %state.config.storage.state_path.display(),
        "mission control initialized"
    );
    Ok(state)
}
