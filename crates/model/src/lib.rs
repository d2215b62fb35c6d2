//! The model capability consumed by the agent loop.
//!
//! Providers are adapters behind [`ModelProvider`]; the core never talks
//! to a model API directly. The crate ships a deterministic
//! [`ScriptedProvider`] for tests and local development.

pub mod scripted;

pub use scripted::ScriptedProvider;

use mc_domain::error::Result;
use mc_domain::message::Message;
use mc_domain::stream::{BoxStream, ModelEvent};

/// A provider-agnostic model invocation request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The rolling mission history.
    pub messages: Vec<Message>,
    /// Model identifier override. `None` uses the provider default.
    pub model: Option<String>,
}

/// Trait every model adapter implements.
#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    /// Start a streaming invocation. Yields [`ModelEvent`]s; text and
    /// thinking chunks carry cumulative snapshots.
    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, ModelEvent>>;

    /// The model name reported on assistant messages.
    fn model_name(&self) -> &str;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
