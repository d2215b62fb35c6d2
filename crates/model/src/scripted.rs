//! Deterministic scripted provider.
//!
//! Each `chat_stream` call pops the next script from the front of the
//! queue and replays its events. Tests specify exact sequences, including
//! tool calls and failures, without network access. When the scripts run
//! out, the provider falls back to echoing the last user message.

use std::sync::Arc;

use futures_util::{stream, StreamExt};
use parking_lot::Mutex;

use mc_domain::error::Result;
use mc_domain::message::{Message, Role, ToolCall};
use mc_domain::stream::{BoxStream, ModelEvent, Usage};

use crate::{ChatRequest, ModelProvider};

pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Vec<ModelEvent>>>>,
    model: String,
    /// Pause before each event, to exercise in-flight streaming paths.
    event_delay: Option<std::time::Duration>,
    /// The last request seen, for test inspection.
    pub last_request: Arc<Mutex<Option<ChatRequest>>>,
}

impl ScriptedProvider {
    /// Build a provider from an ordered list of per-call scripts.
    pub fn new(scripts: Vec<Vec<ModelEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            model: "scripted-1".into(),
            event_delay: None,
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sleep this long before yielding each event.
    pub fn with_event_delay(mut self, delay: std::time::Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }

    /// Convenience: every call answers with a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            ModelEvent::Text { text: r.clone() },
            ModelEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 5,
                    completion_tokens: 5,
                    total_tokens: 10,
                }),
                reported_cost_cents: None,
            },
        ]])
    }

    /// Convenience: first call emits a tool call, second call the reply.
    pub fn tool_then_text(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                ModelEvent::ToolCallRequest {
                    call: ToolCall {
                        call_id: call_id.into(),
                        tool_name: tool_name.into(),
                        arguments,
                    },
                },
                ModelEvent::Done {
                    usage: Some(Usage {
                        prompt_tokens: 8,
                        completion_tokens: 2,
                        total_tokens: 10,
                    }),
                    reported_cost_cents: None,
                },
            ],
            vec![
                ModelEvent::Text {
                    text: final_text.into(),
                },
                ModelEvent::Done {
                    usage: Some(Usage {
                        prompt_tokens: 12,
                        completion_tokens: 6,
                        total_tokens: 18,
                    }),
                    reported_cost_cents: None,
                },
            ],
        ])
    }

    /// Scripts remaining in the queue (for test assertions).
    pub fn remaining(&self) -> usize {
        self.scripts.lock().len()
    }

    fn echo_script(req: &ChatRequest) -> Vec<ModelEvent> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("[no input]");
        vec![
            ModelEvent::Text {
                text: format!("ECHO: {reply}"),
            },
            ModelEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    total_tokens: 2,
                }),
                reported_cost_cents: None,
            },
        ]
    }
}

#[async_trait::async_trait]
impl ModelProvider for ScriptedProvider {
    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, ModelEvent>> {
        let events = {
            let mut scripts = self.scripts.lock();
            if scripts.is_empty() {
                Self::echo_script(&req)
            } else {
                scripts.remove(0)
            }
        };
        *self.last_request.lock() = Some(req);

        match self.event_delay {
            None => Ok(Box::pin(stream::iter(events))),
            Some(delay) => Ok(Box::pin(stream::iter(events).then(move |event| async move {
                tokio::time::sleep(delay).await;
                event
            }))),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}
