//! Background ingestion of uploaded audio
//!
//! A cache hit is served synchronously from the transcript cached under the
//! upload's content hash. A miss returns immediately and runs transcription,
//! speaker naming and suggestion generation on a detached task, publishing
//! `{status, stage, percent}` updates keyed by hash.

use crate::agent::SessionManager;
use crate::cache::{CacheLookup, ContentHashCache};
use crate::repository::ConversationRepository;
use crate::transcription::{
    apply_speaker_names, format_transcript, merge_utterances, Analyst, Suggestion, Transcriber,
};
use anyhow::{Context, Result};
use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    Processing,
    Completed,
    Failed,
    Unknown,
}

/// Latest progress report for one content hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub status: ProcessingState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<Suggestion>>,
}

impl ProcessingStatus {
    pub fn unknown() -> Self {
        Self {
            status: ProcessingState::Unknown,
            stage: None,
            percent: None,
            error: None,
            suggestions: None,
        }
    }

    fn processing(stage: &str, percent: u8) -> Self {
        Self {
            status: ProcessingState::Processing,
            stage: Some(stage.to_string()),
            percent: Some(percent),
            error: None,
            suggestions: None,
        }
    }

    fn completed(suggestions: Vec<Suggestion>) -> Self {
        Self {
            status: ProcessingState::Completed,
            stage: Some("Completed".to_string()),
            percent: Some(100),
            error: None,
            suggestions: Some(suggestions),
        }
    }

    fn failed(error: String) -> Self {
        Self {
            status: ProcessingState::Failed,
            stage: Some("Failed".to_string()),
            percent: Some(100),
            error: Some(error),
            suggestions: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub conversation_uuid: String,
    pub file_hash: String,
    pub is_cached: bool,
    pub filename: String,
}

/// How an upload is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Transcript already cached
    Cached,
    /// Same bytes are being transcribed; wait for that job
    Joined,
    /// First upload of these bytes; a new job runs
    Started,
}

/// Conversation created by an upload, waiting for its transcript
#[derive(Debug, Clone)]
struct PendingConversation {
    conversation_uuid: String,
    user_uuid: String,
    title: String,
}

pub struct Ingestor {
    cache: Arc<ContentHashCache>,
    sessions: Arc<SessionManager>,
    repository: Option<ConversationRepository>,
    transcriber: Arc<dyn Transcriber>,
    analyst: Arc<dyn Analyst>,
    statuses: RwLock<HashMap<String, ProcessingStatus>>,
    /// Conversations attached to an in-flight transcription, by hash
    waiting: Mutex<HashMap<String, Vec<PendingConversation>>>,
}

impl Ingestor {
    pub fn new(
        cache: Arc<ContentHashCache>,
        sessions: Arc<SessionManager>,
        repository: Option<ConversationRepository>,
        transcriber: Arc<dyn Transcriber>,
        analyst: Arc<dyn Analyst>,
    ) -> Self {
        Self {
            cache,
            sessions,
            repository,
            transcriber,
            analyst,
            statuses: RwLock::new(HashMap::new()),
            waiting: Mutex::new(HashMap::new()),
        }
    }

    /// Accept an upload and create a conversation for it.
    ///
    /// Returns as soon as the conversation id is known; `is_cached` tells the
    /// caller whether the transcript is ready or must be polled for.
    pub async fn upload(
        self: &Arc<Self>,
        audio: Bytes,
        filename: &str,
        user_uuid: &str,
    ) -> Result<UploadResponse> {
        let lookup = self.cache.resolve(audio.clone()).await?;
        let conversation_uuid = uuid::Uuid::new_v4().to_string();

        let admission = if lookup.cached {
            Admission::Cached
        } else {
            self.admit(&lookup.hash, &conversation_uuid, user_uuid, filename)
                .await?
        };

        match admission {
            Admission::Cached => {
                info!(
                    "Upload {} ({}) hit the transcript cache, conversation {}",
                    filename, lookup.hash, conversation_uuid
                );
                self.serve_cached(&lookup, &conversation_uuid, user_uuid, filename)
                    .await?;
            }
            Admission::Joined => {
                info!(
                    "Upload {} ({}) already processing, conversation {} will be seeded when it finishes",
                    filename, lookup.hash, conversation_uuid
                );
            }
            Admission::Started => {
                info!(
                    "Upload {} ({}) not cached, transcribing for conversation {}",
                    filename, lookup.hash, conversation_uuid
                );
                let ingestor = Arc::clone(self);
                let hash = lookup.hash.clone();
                tokio::spawn(async move {
                    ingestor.process(hash, audio).await;
                });
            }
        }

        Ok(UploadResponse {
            conversation_uuid,
            file_hash: lookup.hash,
            is_cached: admission == Admission::Cached,
            filename: filename.to_string(),
        })
    }

    /// Decide, under the `waiting` lock, whether a missed upload joins a running
    /// job, starts one, or finds that a job finished since the cache lookup.
    ///
    /// The pipeline writes the cached transcript before it leaves `waiting`, so
    /// an absent entry with a present file means the transcript is ready.
    async fn admit(
        &self,
        hash: &str,
        conversation_uuid: &str,
        user_uuid: &str,
        filename: &str,
    ) -> Result<Admission> {
        let mut waiting = self.waiting.lock().await;
        let pending = PendingConversation {
            conversation_uuid: conversation_uuid.to_string(),
            user_uuid: user_uuid.to_string(),
            title: filename.to_string(),
        };

        if let Some(list) = waiting.get_mut(hash) {
            list.push(pending);
            return Ok(Admission::Joined);
        }

        let transcript_path = self.cache.transcript_path(hash);
        if tokio::fs::try_exists(&transcript_path)
            .await
            .with_context(|| format!("Failed to stat {}", transcript_path.display()))?
        {
            return Ok(Admission::Cached);
        }

        waiting.insert(hash.to_string(), vec![pending]);
        self.set_status(hash, ProcessingStatus::processing("Queued", 0))
            .await;
        Ok(Admission::Started)
    }

    /// Seed a new conversation from the cached transcript
    async fn serve_cached(
        self: &Arc<Self>,
        lookup: &CacheLookup,
        conversation_uuid: &str,
        user_uuid: &str,
        filename: &str,
    ) -> Result<()> {
        let transcript = self.cache.read_transcript(&lookup.hash).await?;
        let pending = PendingConversation {
            conversation_uuid: conversation_uuid.to_string(),
            user_uuid: user_uuid.to_string(),
            title: format!("{} (Cached)", filename),
        };
        self.attach(&pending, &lookup.hash, &transcript, &lookup.transcript_path)
            .await?;

        match self.cache.load_suggestions(&lookup.hash).await? {
            Some(suggestions) => {
                self.set_status(&lookup.hash, ProcessingStatus::completed(suggestions))
                    .await;
            }
            None => {
                self.set_status(&lookup.hash, ProcessingStatus::completed(Vec::new()))
                    .await;
                let ingestor = Arc::clone(self);
                let hash = lookup.hash.clone();
                tokio::spawn(async move {
                    ingestor.regenerate_suggestions(&hash, &transcript).await;
                });
            }
        }
        Ok(())
    }

    /// Latest status for `hash`; unknown hashes report `unknown`
    pub async fn processing_status(&self, hash: &str) -> ProcessingStatus {
        self.statuses
            .read()
            .await
            .get(hash)
            .cloned()
            .unwrap_or_else(ProcessingStatus::unknown)
    }

    pub async fn clear(&self) {
        self.statuses.write().await.clear();
        self.waiting.lock().await.clear();
    }

    async fn set_status(&self, hash: &str, status: ProcessingStatus) {
        self.statuses.write().await.insert(hash.to_string(), status);
    }

    async fn stage(&self, hash: &str, stage: &str, percent: u8) {
        info!("Processing {}: {} ({}%)", hash, stage, percent);
        self.set_status(hash, ProcessingStatus::processing(stage, percent))
            .await;
    }

    async fn process(&self, hash: String, audio: Bytes) {
        match self.run_pipeline(&hash, audio).await {
            Ok(suggestions) => {
                info!("Processing {} completed", hash);
                self.set_status(&hash, ProcessingStatus::completed(suggestions))
                    .await;
            }
            Err(e) => {
                error!("Processing {} failed: {:#}", hash, e);
                self.waiting.lock().await.remove(&hash);
                self.set_status(&hash, ProcessingStatus::failed(format!("{:#}", e)))
                    .await;
            }
        }
    }

    async fn run_pipeline(&self, hash: &str, audio: Bytes) -> Result<Vec<Suggestion>> {
        self.stage(hash, "Transcribing audio...", 10).await;
        let utterances = self.transcriber.transcribe(audio).await?;

        self.stage(hash, "Merging speaker turns...", 20).await;
        let mut blocks = merge_utterances(utterances);

        self.stage(hash, "Identifying speakers...", 40).await;
        let names = match self.analyst.identify_speakers(&blocks).await {
            Ok(names) => names,
            Err(e) => {
                warn!("Speaker identification for {} failed: {:#}", hash, e);
                HashMap::new()
            }
        };

        self.stage(hash, "Applying speaker names...", 60).await;
        apply_speaker_names(&mut blocks, &names);

        self.stage(hash, "Formatting transcript...", 70).await;
        let transcript = format_transcript(&blocks);
        let path = self.cache.store_transcript(hash, &transcript).await?;

        self.stage(hash, "Generating suggestions...", 90).await;
        let suggestions = self.suggest(hash, &transcript).await;

        let pending = self.waiting.lock().await.remove(hash).unwrap_or_default();
        for conversation in &pending {
            self.attach(conversation, hash, &transcript, &path).await?;
        }

        Ok(suggestions)
    }

    /// Generate and cache suggestions; failures only cost the suggestions
    async fn suggest(&self, hash: &str, transcript: &str) -> Vec<Suggestion> {
        match self.analyst.suggest_prompts(transcript).await {
            Ok(suggestions) => {
                if let Err(e) = self.cache.store_suggestions(hash, &suggestions).await {
                    warn!("Failed to cache suggestions for {}: {:#}", hash, e);
                }
                suggestions
            }
            Err(e) => {
                warn!("Suggestion generation for {} failed: {:#}", hash, e);
                Vec::new()
            }
        }
    }

    async fn regenerate_suggestions(&self, hash: &str, transcript: &str) {
        let suggestions = self.suggest(hash, transcript).await;
        if !suggestions.is_empty() {
            self.set_status(hash, ProcessingStatus::completed(suggestions))
                .await;
        }
    }

    /// Seed the conversation's session with the transcript and record it in
    /// the repository
    async fn attach(
        &self,
        conversation: &PendingConversation,
        hash: &str,
        transcript: &str,
        path: &Path,
    ) -> Result<()> {
        self.sessions
            .record_transcript_path(&conversation.conversation_uuid, path)
            .await;
        self.sessions
            .replace_transcript(&conversation.conversation_uuid, transcript)
            .await?;

        if let Some(repo) = &self.repository {
            repo.create_or_update_conversation(
                &conversation.conversation_uuid,
                &conversation.user_uuid,
                Some(&conversation.title),
                Some(hash),
            )
            .await?;
        }
        Ok(())
    }
}
