use super::{parse_json_reply, Analyst, SpeakerBlock, Suggestion};
use crate::agent::{ChatCompletionsClient, ChatMessage};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Upper bound on transcript characters sent for speaker identification
const SPEAKER_CONTEXT_CHARS: usize = 15_000;
const MAX_SUGGESTIONS: usize = 5;

/// Analyst backed by a chat completions model
pub struct ChatAnalyst {
    client: Arc<ChatCompletionsClient>,
}

#[derive(Debug, Deserialize)]
struct SpeakerList {
    #[serde(default)]
    speakers: Vec<NamedSpeaker>,
}

#[derive(Debug, Deserialize)]
struct NamedSpeaker {
    id: serde_json::Value,
    name: String,
}

impl ChatAnalyst {
    pub fn new(client: Arc<ChatCompletionsClient>) -> Self {
        Self { client }
    }

    async fn ask(&self, prompt: String) -> Result<serde_json::Value> {
        let reply = self
            .client
            .complete_text(&[ChatMessage::new("user", prompt)])
            .await?;
        parse_json_reply(&reply)
    }
}

#[async_trait::async_trait]
impl Analyst for ChatAnalyst {
    async fn identify_speakers(&self, blocks: &[SpeakerBlock]) -> Result<HashMap<String, String>> {
        let rendered = serde_json::to_string(blocks)?;
        let excerpt: String = rendered.chars().take(SPEAKER_CONTEXT_CHARS).collect();

        let prompt = format!(
            "Define names and roles of speakers for Transcript:\n{}\n\n==========\n\
             Return json {{\"speakers\": [{{\"id\": <id of speaker from transcript>, \"name\": <>, \"role\": <>}}]}}",
            excerpt
        );

        let list: SpeakerList =
            serde_json::from_value(self.ask(prompt).await?).context("Unexpected speaker list")?;

        let names: HashMap<String, String> = list
            .speakers
            .into_iter()
            .map(|s| {
                let id = match s.id {
                    serde_json::Value::String(id) => id,
                    other => other.to_string(),
                };
                (id, s.name)
            })
            .collect();

        debug!("Identified {} speakers", names.len());
        Ok(names)
    }

    async fn suggest_prompts(&self, transcript: &str) -> Result<Vec<Suggestion>> {
        let prompt = format!(
            "Get top 5 actions that relate to the transcript and will be interesting to the user:\n\
             {}\n=========\n\
             Return json (list of objects) [{{\"id\": <int starting with 1>, \
             \"label\": <up to 3 words naming the action, starting with a matching icon>, \
             \"prompt\": <full text of the action>}}]",
            transcript
        );

        let mut suggestions: Vec<Suggestion> =
            serde_json::from_value(self.ask(prompt).await?).context("Unexpected suggestion list")?;
        suggestions.truncate(MAX_SUGGESTIONS);
        Ok(suggestions)
    }
}
