//! Queued user messages awaiting a turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A pending user message. Created on post, removed atomically when the
/// mission's worker starts the turn that consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub mission_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn new(mission_id: impl Into<String>, content: impl Into<String>, agent: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mission_id: mission_id.into(),
            content: content.into(),
            agent,
            enqueued_at: Utc::now(),
        }
    }
}
