use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::message::ToolCall;

/// A boxed async stream, used for model streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events yielded while a model invocation streams (provider-agnostic).
///
/// Text and thinking chunks carry the cumulative snapshot for the current
/// passage, not an increment; the agent loop records them as observed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ModelEvent {
    /// Cumulative reasoning text for the in-progress thought.
    #[serde(rename = "thinking")]
    Thinking { text: String },

    /// Cumulative assistant text so far.
    #[serde(rename = "text")]
    Text { text: String },

    /// The model requests a tool invocation.
    #[serde(rename = "tool_call")]
    ToolCallRequest { call: ToolCall },

    /// The invocation finished.
    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        /// Actual charge reported by the provider, in cents, when it has one.
        reported_cost_cents: Option<i64>,
    },

    /// The invocation failed; `fatal` marks errors the loop must not retry.
    #[serde(rename = "error")]
    Error { message: String, fatal: bool },
}

/// Token usage for one model invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}
