use std::sync::Arc;

use mc_domain::config::Config;
use mc_missions::{EventStore, MessageQueue, MissionRegistry};
use mc_model::ModelProvider;

use crate::bus::EventBus;
use crate::runtime::cancel::{CancelMap, CancelToken};
use crate::runtime::scheduler::ParallelScheduler;
use crate::runtime::waiters::ToolCallCoordinator;

/// Shared application state passed to every runtime component.
///
/// Fields are grouped by concern:
/// - **Core services**: config, model provider
/// - **Persistence**: registry, event store, queue
/// - **Runtime**: bus, waiters, scheduler, cancel map, shutdown signal
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub provider: Arc<dyn ModelProvider>,

    // ── Persistence ───────────────────────────────────────────────────
    pub registry: Arc<MissionRegistry>,
    pub events: Arc<EventStore>,
    pub queue: Arc<MessageQueue>,

    // ── Runtime ───────────────────────────────────────────────────────
    pub bus: Arc<EventBus>,
    pub waiters: Arc<ToolCallCoordinator>,
    pub scheduler: Arc<ParallelScheduler>,
    pub cancel_map: Arc<CancelMap>,
    /// Fired once at shutdown; workers drain and missions quiesce.
    pub shutdown: CancelToken,
}
