//! Mission records and the status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Active,
    Completed,
    Failed,
    Interrupted,
    Blocked,
    NotFeasible,
}

impl MissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
            Self::Blocked => "blocked",
            Self::NotFeasible => "not_feasible",
        }
    }

    /// Whether a mission in this status may be resumed back to `active`.
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            Self::Interrupted | Self::Blocked | Self::Failed | Self::Completed
        )
    }

    /// Whether the transition `self -> to` is allowed.
    ///
    /// `active` may move to any terminal status; resumable terminals may
    /// move back to `active`; `not_feasible` is final.
    pub fn can_transition_to(self, to: MissionStatus) -> bool {
        match (self, to) {
            (Self::Active, Self::Completed)
            | (Self::Active, Self::Failed)
            | (Self::Active, Self::Interrupted)
            | (Self::Active, Self::Blocked)
            | (Self::Active, Self::NotFeasible) => true,
            (from, Self::Active) => from.is_resumable(),
            _ => false,
        }
    }

    /// Validate a transition, producing the typed boundary error on refusal.
    pub fn check_transition(self, to: MissionStatus) -> Result<()> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.as_str().into(),
                to: to.as_str().into(),
            })
        }
    }
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mission record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A long-lived agent session with an ordered event history, a status and
/// an attached message queue. Event and queue records reference missions
/// by id only; the registry exclusively owns these records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub status: MissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_profile: Option<String>,
    /// Echoed from create params; the core attaches no behavior.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_network: Option<bool>,
    /// Deliverables the caller expects; echoed in running snapshots.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_deliverables: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted_at: Option<DateTime<Utc>>,
}

impl Mission {
    /// Resumable flag derived from status (not stored).
    pub fn resumable(&self) -> bool {
        self.status != MissionStatus::Active && self.status.is_resumable()
    }
}

/// Parameters accepted by mission create.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateMissionParams {
    pub title: Option<String>,
    pub workspace_id: Option<String>,
    pub agent: Option<String>,
    pub backend: Option<String>,
    pub model_override: Option<String>,
    pub config_profile: Option<String>,
    pub shared_network: Option<bool>,
    #[serde(default)]
    pub expected_deliverables: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker state (snapshot vocabulary, distinct from mission status)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Admission requested, waiting for a scheduler slot.
    Queued,
    /// Worker started (idle-waiting on the queue or running a turn).
    Running,
    /// Suspended on a tool-call waiter.
    WaitingForTool,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::WaitingForTool => "waiting_for_tool",
        }
    }
}

/// Per-mission health level reported by the stall detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Ok,
    Degraded,
    StalledWarn,
    StalledSevere,
}

impl HealthLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::StalledWarn => "stalled_warn",
            Self::StalledSevere => "stalled_severe",
        }
    }
}
