use super::{Transcriber, Utterance};
use crate::config::TranscriptionConfig;
use crate::error::ServiceError;
use anyhow::{Context, Result};
use axum::body::Bytes;
use serde::Deserialize;
use tracing::{debug, info};

/// Prerecorded-audio transcription over the Deepgram listen API
pub struct DeepgramTranscriber {
    http: reqwest::Client,
    config: TranscriptionConfig,
}

#[derive(Debug, Deserialize)]
struct ListenResponse {
    #[serde(default)]
    results: ListenResults,
}

#[derive(Debug, Default, Deserialize)]
struct ListenResults {
    #[serde(default)]
    utterances: Vec<RawUtterance>,
}

#[derive(Debug, Deserialize)]
struct RawUtterance {
    #[serde(default)]
    speaker: Option<u32>,
    start: f64,
    end: f64,
    transcript: String,
}

impl DeepgramTranscriber {
    pub fn new(config: TranscriptionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, config })
    }
}

#[async_trait::async_trait]
impl Transcriber for DeepgramTranscriber {
    async fn transcribe(&self, audio: Bytes) -> Result<Vec<Utterance>> {
        info!(
            "Transcribing {} bytes with model {}",
            audio.len(),
            self.config.model
        );

        let response = self
            .http
            .post(&self.config.api_url)
            .header("Authorization", format!("Token {}", self.config.api_key))
            .query(&[
                ("model", self.config.model.as_str()),
                ("language", self.config.language.as_str()),
                ("smart_format", "true"),
                ("diarize", "true"),
                ("utterances", "true"),
            ])
            .body(audio)
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(format!("Transcription API unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ServiceError::Upstream(format!(
                "Transcription API returned {}: {}",
                status, detail
            ))
            .into());
        }

        let body: ListenResponse = response.json().await.map_err(|e| {
            ServiceError::Upstream(format!("Malformed transcription response: {}", e))
        })?;

        let utterances: Vec<Utterance> = body
            .results
            .utterances
            .into_iter()
            .map(|u| Utterance {
                speaker: u.speaker.unwrap_or_default().to_string(),
                start: u.start,
                end: u.end,
                text: u.transcript,
            })
            .collect();

        debug!("Transcription returned {} utterances", utterances.len());
        Ok(utterances)
    }
}
