//! Mission registry.
//!
//! Source of truth for mission records and the status machine. Persists to
//! `missions.json` under the configured state path. Status-change events
//! are committed by the caller at the operation boundary; the registry
//! itself only owns the records and the transition rules.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use mc_domain::error::{Error, Result};
use mc_domain::mission::{CreateMissionParams, Mission, MissionStatus};

/// What `resume` actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Transitioned back to active from the given status.
    Resumed { from: MissionStatus },
    /// The mission was already active; nothing changed.
    AlreadyActive,
}

/// Mission registry backed by a JSON file.
pub struct MissionRegistry {
    path: PathBuf,
    missions: RwLock<HashMap<String, Mission>>,
}

impl MissionRegistry {
    /// Load or create the registry at `state_path/missions.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;
        let path = state_path.join("missions.json");
        let missions: HashMap<String, Mission> = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            missions = missions.len(),
            path = %path.display(),
            "mission registry loaded"
        );

        Ok(Self {
            path,
            missions: RwLock::new(missions),
        })
    }

    /// Create a mission. Starts `active` and eligible for scheduling.
    pub fn create(&self, params: CreateMissionParams) -> Result<Mission> {
        let now = Utc::now();
        let mission = Mission {
            id: Uuid::new_v4().to_string(),
            status: MissionStatus::Active,
            title: params.title,
            workspace_id: params.workspace_id,
            agent: params.agent,
            backend: params.backend,
            model_override: params.model_override,
            config_profile: params.config_profile,
            shared_network: params.shared_network,
            expected_deliverables: params.expected_deliverables,
            created_at: now,
            updated_at: now,
            interrupted_at: None,
        };

        self.missions
            .write()
            .insert(mission.id.clone(), mission.clone());
        self.flush()?;

        tracing::info!(mission_id = %mission.id, "mission created");
        Ok(mission)
    }

    pub fn get(&self, id: &str) -> Result<Mission> {
        self.missions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::MissionNotFound(id.to_owned()))
    }

    /// All missions, ordered by `updated_at` descending.
    pub fn list(&self) -> Vec<Mission> {
        let mut all: Vec<Mission> = self.missions.read().values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    /// Missions currently eligible for scheduling.
    pub fn list_running(&self) -> Vec<Mission> {
        self.missions
            .read()
            .values()
            .filter(|m| m.status == MissionStatus::Active)
            .cloned()
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.missions.read().keys().cloned().collect()
    }

    /// Apply a status transition. Returns `(previous_status, mission)` so
    /// the caller can commit the `mission_status_changed` event.
    pub fn set_status(
        &self,
        id: &str,
        to: MissionStatus,
    ) -> Result<(MissionStatus, Mission)> {
        let updated = {
            let mut missions = self.missions.write();
            let mission = missions
                .get_mut(id)
                .ok_or_else(|| Error::MissionNotFound(id.to_owned()))?;

            mission.status.check_transition(to)?;
            let from = mission.status;
            mission.status = to;
            mission.updated_at = Utc::now();
            if to == MissionStatus::Interrupted {
                mission.interrupted_at = Some(mission.updated_at);
            }
            (from, mission.clone())
        };
        self.flush()?;

        tracing::info!(
            mission_id = %id,
            from = %updated.0,
            to = %updated.1.status,
            "mission status changed"
        );
        Ok(updated)
    }

    /// Resume a mission back to `active`. A no-op when already active so
    /// a double resume yields a single status change.
    pub fn resume(&self, id: &str) -> Result<(ResumeOutcome, Mission)> {
        {
            let missions = self.missions.read();
            let mission = missions
                .get(id)
                .ok_or_else(|| Error::MissionNotFound(id.to_owned()))?;
            if mission.status == MissionStatus::Active {
                return Ok((ResumeOutcome::AlreadyActive, mission.clone()));
            }
        }
        let (from, mission) = self.set_status(id, MissionStatus::Active)?;
        Ok((ResumeOutcome::Resumed { from }, mission))
    }

    /// Set a title derived from the first message, once.
    pub fn set_title_if_empty(&self, id: &str, title: &str) -> Result<()> {
        let changed = {
            let mut missions = self.missions.write();
            let mission = missions
                .get_mut(id)
                .ok_or_else(|| Error::MissionNotFound(id.to_owned()))?;
            if mission.title.is_none() && !title.is_empty() {
                mission.title = Some(title.to_owned());
                true
            } else {
                false
            }
        };
        if changed {
            self.flush()?;
        }
        Ok(())
    }

    /// Touch `updated_at` (list ordering follows recent activity).
    pub fn touch(&self, id: &str) {
        let mut missions = self.missions.write();
        if let Some(mission) = missions.get_mut(id) {
            mission.updated_at = Utc::now();
        }
    }

    /// Startup sweep: missions persisted as `active` have no live worker
    /// after a restart, so they become `interrupted` and resumable. Their
    /// queued messages survive for a later resume. Returns the affected
    /// missions so the caller can commit status events.
    pub fn recover_interrupted(&self) -> Result<Vec<Mission>> {
        let stranded: Vec<String> = self
            .missions
            .read()
            .values()
            .filter(|m| m.status == MissionStatus::Active)
            .map(|m| m.id.clone())
            .collect();

        let mut recovered = Vec::with_capacity(stranded.len());
        for id in stranded {
            let (_, mission) = self.set_status(&id, MissionStatus::Interrupted)?;
            tracing::warn!(mission_id = %id, "mission interrupted by server restart");
            recovered.push(mission);
        }
        Ok(recovered)
    }

    /// Persist the current registry state to disk.
    pub fn flush(&self) -> Result<()> {
        let missions = self.missions.read();
        let json = serde_json::to_string_pretty(&*missions)
            .map_err(|e| Error::Storage(format!("serializing missions: {e}")))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
