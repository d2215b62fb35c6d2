//! Stored events: the append-only vocabulary of a mission's history.
//!
//! Producers build an [`EventDraft`]; the event store assigns `id`,
//! `sequence` and `timestamp` and returns the [`StoredEvent`]. The
//! `metadata` bag is deliberately open; consumers must ignore unknown keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserMessage,
    AssistantMessage,
    ToolCall,
    ToolResult,
    TextDelta,
    Thinking,
    AgentPhase,
    Progress,
    MissionStatusChanged,
    Error,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::AssistantMessage => "assistant_message",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::TextDelta => "text_delta",
            Self::Thinking => "thinking",
            Self::AgentPhase => "agent_phase",
            Self::Progress => "progress",
            Self::MissionStatusChanged => "mission_status_changed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Draft
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An event as produced, before the store assigns identity and ordering.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: EventType,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub metadata: Map<String, Value>,
}

impl EventDraft {
    pub fn new(event_type: EventType, content: impl Into<String>) -> Self {
        Self {
            event_type,
            content: content.into(),
            tool_call_id: None,
            tool_name: None,
            metadata: Map::new(),
        }
    }

    pub fn user_message(content: impl Into<String>) -> Self {
        Self::new(EventType::UserMessage, content)
    }

    pub fn assistant_message(content: impl Into<String>, success: bool) -> Self {
        Self::new(EventType::AssistantMessage, content).with_meta("success", Value::Bool(success))
    }

    pub fn text_delta(content: impl Into<String>) -> Self {
        Self::new(EventType::TextDelta, content)
    }

    pub fn thinking(content: impl Into<String>, done: bool) -> Self {
        Self::new(EventType::Thinking, content).with_meta("done", Value::Bool(done))
    }

    pub fn tool_call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        let mut draft = Self::new(EventType::ToolCall, String::new());
        draft.tool_call_id = Some(tool_call_id.into());
        draft.tool_name = Some(tool_name.into());
        draft.metadata.insert("arguments".into(), arguments);
        draft
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: Option<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut draft = Self::new(EventType::ToolResult, content);
        draft.tool_call_id = Some(tool_call_id.into());
        draft.tool_name = tool_name;
        draft
    }

    pub fn status_changed(from: Option<&str>, to: &str, reason: Option<&str>) -> Self {
        let mut draft = Self::new(EventType::MissionStatusChanged, String::new());
        draft.metadata.insert(
            "from".into(),
            from.map(|s| Value::String(s.into())).unwrap_or(Value::Null),
        );
        draft.metadata.insert("to".into(), Value::String(to.into()));
        if let Some(r) = reason {
            draft.metadata.insert("reason".into(), Value::String(r.into()));
        }
        draft
    }

    pub fn agent_phase(phase: impl Into<String>) -> Self {
        Self::new(EventType::AgentPhase, phase)
    }

    pub fn progress(content: impl Into<String>) -> Self {
        Self::new(EventType::Progress, content)
    }

    pub fn error(message: impl Into<String>, resumable: bool) -> Self {
        Self::new(EventType::Error, message).with_meta("resumable", Value::Bool(resumable))
    }

    /// Attach a metadata key, consuming and returning the draft.
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stored event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A committed event. `id` is monotonic across the whole store; `sequence`
/// is monotonic and gap-free per mission, starting at 1. `event_id` lets
/// subscribers dedupe across the replay/live handoff window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub mission_id: String,
    pub sequence: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub event_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl StoredEvent {
    /// Read a boolean metadata key (missing or non-bool counts as false).
    pub fn meta_bool(&self, key: &str) -> bool {
        self.metadata.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Read a string metadata key.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// How the cost figure on an `assistant_message` was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostSource {
    /// The provider reported the real charge.
    Actual,
    /// Computed from the configured pricing table.
    Estimated,
    /// No basis for a figure; consumers hide cost.
    Unknown,
}

impl CostSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Actual => "actual",
            Self::Estimated => "estimated",
            Self::Unknown => "unknown",
        }
    }
}
