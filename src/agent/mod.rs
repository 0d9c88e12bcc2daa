//! Reasoning-agent seam and per-conversation session management
//!
//! The agent itself (the language-model call) sits behind [`ReasoningAgent`]:
//! - [`ChatCompletionsAgent`]: OpenAI-compatible HTTP implementation
//! - tests plug in in-process fakes
//!
//! [`SessionManager`] keeps one live agent per conversation id.

mod extract;
mod manager;
mod memory;
mod openai;

pub use extract::extract_answer;
pub use manager::{ConversationHandle, SessionManager};
pub use memory::{Role, SessionMemory, Turn};
pub use openai::{ChatAgentFactory, ChatCompletionsAgent, ChatCompletionsClient, ChatMessage};

use anyhow::Result;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Shapes the "final output" of a run can take
#[derive(Debug, Clone, PartialEq)]
pub enum FinalOutput {
    /// Plain answer text
    Text(String),
    /// Structured output carrying a dedicated text field
    Structured {
        text_content: String,
        data: serde_json::Value,
    },
    /// Anything else; rendered as JSON text
    Opaque(serde_json::Value),
}

/// Outcome of a non-streaming run
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub final_output: Option<FinalOutput>,
    /// Full upstream response, used when nothing better is available
    pub raw: serde_json::Value,
}

/// Items emitted by a streaming run, in generation order
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    TextDelta(String),
    /// Non-text run item, e.g. a tool invocation
    Item { item_type: String, data: String },
    /// Last item of the stream
    Completed {
        final_output: Option<FinalOutput>,
        raw: serde_json::Value,
    },
}

pub type RunStream = Pin<Box<dyn Stream<Item = Result<RunEvent>> + Send>>;

/// A reasoning agent whose instructions are seeded with one transcript
#[async_trait::async_trait]
pub trait ReasoningAgent: Send + Sync {
    /// Run to completion
    async fn run(&self, prompt: &str, memory: &SessionMemory) -> Result<RunResult>;

    /// Run, yielding incremental output
    async fn run_streamed(&self, prompt: &str, memory: &SessionMemory) -> Result<RunStream>;

    /// Agent name for logging
    fn name(&self) -> &str;
}

/// Builds one agent per conversation
#[async_trait::async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create(&self, conversation_id: &str, transcript: &str) -> Result<Arc<dyn ReasoningAgent>>;
}

/// System instructions for an agent answering questions about `transcript`
pub fn system_instructions(transcript: &str) -> String {
    format!(
        "You answer the user's questions when they relate to the transcript below or its topics.\n\
         Summarize, provide insights and quote the transcript text as context.\n\
         Answer in the language of the user's request, which may differ from the transcript's language.\n\
         Transcript:\n{}",
        transcript
    )
}
