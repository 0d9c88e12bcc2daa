// Shared fixtures for integration tests
//
// In-process collaborators stand in for the transcription and reasoning
// APIs so the orchestrator can be exercised end to end without a network.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use axum::body::Bytes;
use futures::stream;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use transcript_agent::agent::SessionMemory;
use transcript_agent::config::StorageConfig;
use transcript_agent::ingest::{ProcessingState, ProcessingStatus};
use transcript_agent::transcription::SpeakerBlock;
use transcript_agent::{
    AgentFactory, Analyst, Collaborators, Config, FinalOutput, ReasoningAgent, RunEvent,
    RunResult, RunStream, Suggestion, TaskStatus, Transcriber, TranscriptService, Utterance,
};

/// Prompts containing this word make the fake agent fail
pub const FAILING_PROMPT: &str = "please fail now";

/// Prompts containing this word make the fake agent wait before answering
pub const SLOW_PROMPT: &str = "answer slowly";
const SLOW_DELAY: Duration = Duration::from_millis(300);

pub fn answer_for(prompt: &str) -> String {
    format!("Answer to: {}", prompt)
}

// ============================================================================
// Reasoning agent
// ============================================================================

/// Answers every prompt with `Answer to: <prompt>`
pub struct EchoAgent {
    pub transcript: String,
}

#[async_trait::async_trait]
impl ReasoningAgent for EchoAgent {
    async fn run(&self, prompt: &str, _memory: &SessionMemory) -> Result<RunResult> {
        if prompt.contains("slowly") {
            tokio::time::sleep(SLOW_DELAY).await;
        }
        if prompt.contains("fail") {
            return Err(anyhow!("Reasoning API returned 500: boom"));
        }
        Ok(RunResult {
            final_output: Some(FinalOutput::Text(answer_for(prompt))),
            raw: json!({ "prompt": prompt }),
        })
    }

    async fn run_streamed(&self, prompt: &str, _memory: &SessionMemory) -> Result<RunStream> {
        if prompt.contains("slowly") {
            tokio::time::sleep(SLOW_DELAY).await;
        }
        if prompt.contains("fail") {
            let events: Vec<Result<RunEvent>> = vec![
                Ok(RunEvent::TextDelta("partial ".to_string())),
                Err(anyhow!("Reasoning stream broke")),
            ];
            return Ok(Box::pin(stream::iter(events)));
        }

        let answer = answer_for(prompt);
        let mut events: Vec<Result<RunEvent>> = answer
            .split_inclusive(' ')
            .map(|word| Ok(RunEvent::TextDelta(word.to_string())))
            .collect();
        events.insert(
            1,
            Ok(RunEvent::Item {
                item_type: "tool_call_item".to_string(),
                data: "lookup(transcript)".to_string(),
            }),
        );
        events.push(Ok(RunEvent::Completed {
            final_output: None,
            raw: json!({ "finish_reason": "stop" }),
        }));
        Ok(Box::pin(stream::iter(events)))
    }

    fn name(&self) -> &str {
        "Echo Agent"
    }
}

/// Records the transcript each agent was created with
#[derive(Default)]
pub struct EchoAgentFactory {
    pub created: Mutex<Vec<(String, String)>>,
}

impl EchoAgentFactory {
    pub fn created_count(&self) -> usize {
        self.created.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Transcript of the most recent agent built for `conversation_id`
    pub fn transcript_for(&self, conversation_id: &str) -> Option<String> {
        self.created.lock().ok().and_then(|created| {
            created
                .iter()
                .rev()
                .find(|(id, _)| id == conversation_id)
                .map(|(_, transcript)| transcript.clone())
        })
    }
}

#[async_trait::async_trait]
impl AgentFactory for EchoAgentFactory {
    async fn create(
        &self,
        conversation_id: &str,
        transcript: &str,
    ) -> Result<Arc<dyn ReasoningAgent>> {
        self.created
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push((conversation_id.to_string(), transcript.to_string()));
        Ok(Arc::new(EchoAgent {
            transcript: transcript.to_string(),
        }))
    }
}

// ============================================================================
// Transcription
// ============================================================================

/// Returns two speakers; counts calls and optionally waits or fails
#[derive(Default)]
pub struct FakeTranscriber {
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
    pub fail: bool,
}

impl FakeTranscriber {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _audio: Bytes) -> Result<Vec<Utterance>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(anyhow!("Transcription API returned 401"));
        }

        Ok(vec![
            Utterance {
                speaker: "0".to_string(),
                start: 0.0,
                end: 20.0,
                text: "Welcome to the quarterly review.".to_string(),
            },
            Utterance {
                speaker: "0".to_string(),
                start: 20.0,
                end: 45.0,
                text: "Revenue grew ten percent.".to_string(),
            },
            Utterance {
                speaker: "1".to_string(),
                start: 45.0,
                end: 70.0,
                text: "What about costs?".to_string(),
            },
        ])
    }
}

pub struct FakeAnalyst;

#[async_trait::async_trait]
impl Analyst for FakeAnalyst {
    async fn identify_speakers(&self, _blocks: &[SpeakerBlock]) -> Result<HashMap<String, String>> {
        Ok(HashMap::from([("0".to_string(), "Ana".to_string())]))
    }

    async fn suggest_prompts(&self, _transcript: &str) -> Result<Vec<Suggestion>> {
        Ok(vec![
            Suggestion {
                id: 1,
                label: "Summary".to_string(),
                prompt: "Summarize the meeting".to_string(),
            },
            Suggestion {
                id: 2,
                label: "Action items".to_string(),
                prompt: "List the action items".to_string(),
            },
        ])
    }
}

// ============================================================================
// Service construction
// ============================================================================

pub struct Harness {
    pub service: Arc<TranscriptService>,
    pub config: Config,
    pub agents: Arc<EchoAgentFactory>,
    pub transcriber: Arc<FakeTranscriber>,
}

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage = StorageConfig::rooted_at(root);
    config
}

pub async fn harness(root: &Path) -> Result<Harness> {
    harness_with(test_config(root), FakeTranscriber::default()).await
}

pub async fn harness_with(config: Config, transcriber: FakeTranscriber) -> Result<Harness> {
    let agents = Arc::new(EchoAgentFactory::default());
    let transcriber = Arc::new(transcriber);
    let collaborators = Collaborators {
        agents: agents.clone(),
        transcriber: transcriber.clone(),
        analyst: Arc::new(FakeAnalyst),
    };
    let service = TranscriptService::new(&config, collaborators).await?;

    Ok(Harness {
        service,
        config,
        agents,
        transcriber,
    })
}

/// Poll the task table until the task leaves STARTED
pub async fn wait_for_task(service: &TranscriptService, task_id: &str) -> Result<TaskStatus> {
    for _ in 0..500 {
        let status = service.task_status(task_id).await?;
        if status.status.is_terminal() {
            return Ok(status);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(anyhow!("Task {} did not finish", task_id))
}

/// Poll ingestion until it completes or fails
pub async fn wait_for_processing(
    service: &TranscriptService,
    file_hash: &str,
) -> Result<ProcessingStatus> {
    for _ in 0..500 {
        let status = service.processing_status(file_hash).await;
        if matches!(
            status.status,
            ProcessingState::Completed | ProcessingState::Failed
        ) {
            return Ok(status);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(anyhow!("Processing of {} did not finish", file_hash))
}
