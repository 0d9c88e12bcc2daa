//! Transcription collaborator seam and transcript formatting
//!
//! This module provides:
//! - [`Transcriber`]: speech-to-text with speaker diarization
//! - [`Analyst`]: speaker naming and follow-up suggestions
//! - Merging of diarized utterances into speaker blocks
//! - Rendering of blocks into the plain-text transcript the agent reads

mod analyst;
mod deepgram;

pub use analyst::ChatAnalyst;
pub use deepgram::DeepgramTranscriber;

use anyhow::{Context, Result};
use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One diarized utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker: String,
    /// Seconds from the start of the recording
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Consecutive utterances of one speaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerBlock {
    pub speaker: String,
    /// Display name, once speakers have been identified
    pub name: Option<String>,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Follow-up prompt offered to the user after an upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: u32,
    pub label: String,
    pub prompt: String,
}

#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe raw audio bytes into diarized utterances
    async fn transcribe(&self, audio: Bytes) -> Result<Vec<Utterance>>;
}

#[async_trait::async_trait]
pub trait Analyst: Send + Sync {
    /// Map speaker ids to display names
    async fn identify_speakers(&self, blocks: &[SpeakerBlock]) -> Result<HashMap<String, String>>;

    /// Up to five follow-up prompts for a transcript
    async fn suggest_prompts(&self, transcript: &str) -> Result<Vec<Suggestion>>;
}

/// Merge runs of the same speaker into a single block
pub fn merge_utterances(utterances: Vec<Utterance>) -> Vec<SpeakerBlock> {
    let mut blocks: Vec<SpeakerBlock> = Vec::new();

    for utterance in utterances {
        match blocks.last_mut() {
            Some(current) if current.speaker == utterance.speaker => {
                current.text.push(' ');
                current.text.push_str(&utterance.text);
                current.end = utterance.end;
            }
            _ => blocks.push(SpeakerBlock {
                speaker: utterance.speaker,
                name: None,
                start: utterance.start,
                end: utterance.end,
                text: utterance.text,
            }),
        }
    }

    blocks
}

/// Attach names to blocks; unknown ids become `Speaker <id>`
pub fn apply_speaker_names(blocks: &mut [SpeakerBlock], names: &HashMap<String, String>) {
    for block in blocks {
        block.name = Some(
            names
                .get(&block.speaker)
                .cloned()
                .unwrap_or_else(|| format!("Speaker {}", block.speaker)),
        );
    }
}

/// `HH:MM` with minutes rounded up
pub fn format_timestamp(seconds: f64) -> String {
    let minutes_total = seconds.max(0.0) / 60.0;
    let mut hours = (minutes_total / 60.0).floor() as u64;
    let mut minutes = (minutes_total - hours as f64 * 60.0).ceil() as u64;
    if minutes >= 60 {
        hours += 1;
        minutes -= 60;
    }
    format!("{:02}:{:02}", hours, minutes)
}

/// Render blocks as `[HH:MM - HH:MM (Name)]` headers followed by the text
pub fn format_transcript(blocks: &[SpeakerBlock]) -> String {
    blocks
        .iter()
        .map(|block| {
            let name = block
                .name
                .clone()
                .unwrap_or_else(|| format!("Speaker {}", block.speaker));
            format!(
                "[{} - {} ({})]\n {}\n\n",
                format_timestamp(block.start),
                format_timestamp(block.end),
                name,
                block.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse JSON out of a model reply, preferring a ```json fenced block
pub fn parse_json_reply(reply: &str) -> Result<serde_json::Value> {
    let body = reply.rsplit("```json").next().unwrap_or(reply);
    let body = body.split("```").next().unwrap_or(body);
    serde_json::from_str(body.trim()).context("Model reply is not valid JSON")
}
