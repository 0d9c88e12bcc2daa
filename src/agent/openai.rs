// Chat-completions implementation of the reasoning agent
//
// Talks to any OpenAI-compatible `/v1/chat/completions` endpoint. Streaming
// responses arrive as server-sent events and are parsed with eventsource-stream.

use super::{
    system_instructions, AgentFactory, FinalOutput, ReasoningAgent, RunEvent, RunResult,
    RunStream, SessionMemory,
};
use crate::config::ReasoningConfig;
use crate::error::ServiceError;
use anyhow::{Context, Result};
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

pub struct ChatCompletionsClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
}

impl ChatCompletionsClient {
    pub fn new(config: &ReasoningConfig, model: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: model.to_string(),
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(format!("Reasoning API unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ServiceError::Upstream(format!(
                "Reasoning API returned {}: {}",
                status, detail
            ))
            .into());
        }
        Ok(response)
    }

    /// Single-shot completion, returning the parsed response body
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<Value> {
        let response = self.send(&self.body(messages, false)).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(format!("Malformed reasoning response: {}", e)))?;
        Ok(body)
    }

    /// Single-shot completion, returning only the assistant's text
    pub async fn complete_text(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = self.complete(messages).await?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::Upstream("Reasoning response carried no text".to_string()).into()
            })
    }

    /// Streaming completion as run events
    pub async fn stream(&self, messages: &[ChatMessage]) -> Result<RunStream> {
        let response = self.send(&self.body(messages, true)).await?;
        let events = response.bytes_stream().eventsource();
        Ok(Box::pin(run_events(events, self.model.clone())))
    }
}

/// Translate upstream completion chunks into run events
fn run_events<S, E>(events: S, model: String) -> impl Stream<Item = Result<RunEvent>> + Send
where
    S: Stream<Item = std::result::Result<eventsource_stream::Event, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::try_stream! {
        futures::pin_mut!(events);
        let mut finish_reason = Value::Null;

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| {
                ServiceError::Upstream(format!("Broken reasoning stream: {}", e))
            })?;
            if event.data.trim() == "[DONE]" {
                break;
            }

            let chunk: Value = serde_json::from_str(&event.data)
                .context("Malformed stream chunk")?;
            let choice = &chunk["choices"][0];

            if let Some(text) = choice["delta"]["content"].as_str() {
                if !text.is_empty() {
                    yield RunEvent::TextDelta(text.to_string());
                }
            }
            if let Some(calls) = choice["delta"]["tool_calls"].as_array() {
                for call in calls {
                    yield RunEvent::Item {
                        item_type: "tool_call_item".to_string(),
                        data: call.to_string(),
                    };
                }
            }
            if !choice["finish_reason"].is_null() {
                finish_reason = choice["finish_reason"].clone();
            }
        }

        yield RunEvent::Completed {
            final_output: None,
            raw: json!({ "model": model, "finish_reason": finish_reason }),
        };
    }
}

/// Classify the assistant message of a completion response
fn final_output_of(body: &Value) -> Option<FinalOutput> {
    let message = body.get("choices")?.get(0)?.get("message")?;
    match message.get("content") {
        Some(Value::String(text)) => Some(FinalOutput::Text(text.clone())),
        Some(Value::Array(parts)) => {
            let text: String = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            Some(FinalOutput::Structured {
                text_content: text,
                data: Value::Array(parts.clone()),
            })
        }
        _ => Some(FinalOutput::Opaque(message.clone())),
    }
}

pub struct ChatCompletionsAgent {
    name: String,
    client: Arc<ChatCompletionsClient>,
    instructions: String,
}

impl ChatCompletionsAgent {
    pub fn new(client: Arc<ChatCompletionsClient>, transcript: &str) -> Self {
        Self {
            name: "Transcript Agent".to_string(),
            client,
            instructions: system_instructions(transcript),
        }
    }

    async fn messages(&self, prompt: &str, memory: &SessionMemory) -> Vec<ChatMessage> {
        let history = memory.turns().await;
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::new("system", self.instructions.clone()));
        messages.extend(
            history
                .into_iter()
                .map(|turn| ChatMessage::new(turn.role.as_str(), turn.content)),
        );
        messages.push(ChatMessage::new("user", prompt));
        messages
    }
}

#[async_trait::async_trait]
impl ReasoningAgent for ChatCompletionsAgent {
    async fn run(&self, prompt: &str, memory: &SessionMemory) -> Result<RunResult> {
        let messages = self.messages(prompt, memory).await;
        debug!("{}: running with {} messages", self.name, messages.len());

        let body = self.client.complete(&messages).await?;
        Ok(RunResult {
            final_output: final_output_of(&body),
            raw: body,
        })
    }

    async fn run_streamed(&self, prompt: &str, memory: &SessionMemory) -> Result<RunStream> {
        let messages = self.messages(prompt, memory).await;
        debug!("{}: streaming with {} messages", self.name, messages.len());
        self.client.stream(&messages).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct ChatAgentFactory {
    client: Arc<ChatCompletionsClient>,
}

impl ChatAgentFactory {
    pub fn new(client: Arc<ChatCompletionsClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl AgentFactory for ChatAgentFactory {
    async fn create(&self, conversation_id: &str, transcript: &str) -> Result<Arc<dyn ReasoningAgent>> {
        info!(
            "Creating agent for conversation {} ({} transcript chars, model {})",
            conversation_id,
            transcript.chars().count(),
            self.client.model()
        );
        Ok(Arc::new(ChatCompletionsAgent::new(
            Arc::clone(&self.client),
            transcript,
        )))
    }
}
