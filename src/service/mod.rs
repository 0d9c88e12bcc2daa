//! Task orchestration
//!
//! [`TranscriptService`] owns every piece of in-memory state (task table,
//! stream queues, live conversation handles, ingestion progress) together
//! with the flat stores and the optional metadata repository. It is built once
//! at startup and shared with the HTTP layer behind an `Arc`.

mod types;

pub use types::{
    Cleared, ConversationHistory, ConversationList, ConversationRef, Deleted, HealthReport,
    MessageList, MessageRef, SuggestionList, TaskCreated, TaskRequest, TranscriptLoaded,
};

use crate::agent::{
    extract_answer, AgentFactory, ChatAgentFactory, ChatCompletionsClient, ConversationHandle,
    RunEvent, SessionManager,
};
use crate::cache::ContentHashCache;
use crate::config::{Config, DefaultsConfig};
use crate::error::{ServiceError, ServiceResult};
use crate::ingest::{Ingestor, ProcessingStatus, UploadResponse};
use crate::repository::{ConversationRepository, NewMessage};
use crate::store::TranscriptStore;
use crate::stream::{StreamBus, StreamConsumer, StreamProducer};
use crate::tasks::{TaskRegistry, TaskResult, TaskStatus};
use crate::transcription::{Analyst, ChatAnalyst, DeepgramTranscriber, Transcriber};
use anyhow::{Context, Result};
use axum::body::Bytes;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// External services the orchestrator delegates to
pub struct Collaborators {
    pub agents: Arc<dyn AgentFactory>,
    pub transcriber: Arc<dyn Transcriber>,
    pub analyst: Arc<dyn Analyst>,
}

impl Collaborators {
    /// HTTP-backed collaborators built from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let answers = Arc::new(ChatCompletionsClient::new(
            &config.reasoning,
            &config.reasoning.model,
        )?);
        let analysis = Arc::new(ChatCompletionsClient::new(
            &config.reasoning,
            &config.reasoning.analysis_model,
        )?);

        Ok(Self {
            agents: Arc::new(ChatAgentFactory::new(answers)),
            transcriber: Arc::new(DeepgramTranscriber::new(config.transcription.clone())?),
            analyst: Arc::new(ChatAnalyst::new(analysis)),
        })
    }
}

pub struct TranscriptService {
    defaults: DefaultsConfig,
    allow_global_reset: bool,
    cache: Arc<ContentHashCache>,
    store: Arc<TranscriptStore>,
    repository: Option<ConversationRepository>,
    tasks: Arc<TaskRegistry>,
    streams: Arc<StreamBus>,
    sessions: Arc<SessionManager>,
    ingest: Arc<Ingestor>,
}

impl TranscriptService {
    pub async fn new(config: &Config, collaborators: Collaborators) -> Result<Arc<Self>> {
        let storage = &config.storage;
        for dir in [
            &storage.conversations_dir,
            &storage.transcripts_dir,
            &storage.suggestions_dir,
        ] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let repository = if storage.repository_enabled {
            Some(ConversationRepository::open(&storage.database_path).await?)
        } else {
            info!("Running without metadata repository (flat transcript store only)");
            None
        };

        let cache = Arc::new(ContentHashCache::new(
            &storage.transcripts_dir,
            &storage.suggestions_dir,
        ));
        let store = Arc::new(TranscriptStore::new(&storage.conversations_dir));
        let sessions = Arc::new(SessionManager::new(
            collaborators.agents,
            Arc::clone(&store),
            &storage.transcripts_dir,
        ));
        let ingest = Arc::new(Ingestor::new(
            Arc::clone(&cache),
            Arc::clone(&sessions),
            repository.clone(),
            collaborators.transcriber,
            collaborators.analyst,
        ));

        Ok(Arc::new(Self {
            defaults: config.defaults.clone(),
            allow_global_reset: config.service.allow_global_reset,
            cache,
            store,
            repository,
            tasks: Arc::new(TaskRegistry::new()),
            streams: Arc::new(StreamBus::new()),
            sessions,
            ingest,
        }))
    }

    pub fn repository(&self) -> Option<&ConversationRepository> {
        self.repository.as_ref()
    }

    fn require_repository(&self) -> ServiceResult<&ConversationRepository> {
        self.repository.as_ref().ok_or_else(|| {
            ServiceError::Unavailable("Metadata repository not available".to_string())
        })
    }

    fn user_or_default<'a>(&'a self, user_uuid: &'a str) -> &'a str {
        if user_uuid.trim().is_empty() {
            &self.defaults.user_uuid
        } else {
            user_uuid
        }
    }

    // ============================================================================
    // Tasks
    // ============================================================================

    /// Record a question task and start answering it in the background
    pub async fn submit_task(self: &Arc<Self>, request: TaskRequest) -> ServiceResult<TaskCreated> {
        validate(&request)?;

        let task_id = uuid::Uuid::new_v4().to_string();
        // The queue must exist before the task id is handed out
        let producer = if request.stream {
            Some(self.streams.open(&task_id).await)
        } else {
            None
        };

        let service = Arc::clone(self);
        let id = task_id.clone();
        let job = async move {
            let mut producer = producer;
            let outcome = service.process_task(&id, &request, &mut producer).await;

            if let Err(e) = &outcome {
                error!("Task {} failed: {:#}", id, e);
                if let Some(stream) = producer.take() {
                    stream.error(format!("{:#}", e));
                }
            }
            service.streams.release(&id).await;
            outcome
        };

        self.tasks.submit(task_id.clone(), job).await;
        Ok(TaskCreated { task_id })
    }

    async fn process_task(
        &self,
        task_id: &str,
        request: &TaskRequest,
        producer: &mut Option<StreamProducer>,
    ) -> Result<TaskResult> {
        let conversation_id = request.conversation.uuid.as_str();
        let message_id = request.message.uuid.as_str();
        let prompt = request.message.prompt.as_str();
        let user_uuid = self.user_or_default(&request.conversation.user_uuid);

        info!(
            "Task {}: conversation {}, message {}, stream={}",
            task_id, conversation_id, message_id, request.stream
        );

        let handle = self
            .sessions
            .get_or_create(conversation_id, message_id, request.transcript_path.as_deref())
            .await?;

        if let Some(repo) = &self.repository {
            let existing = repo.get_conversation(conversation_id).await?;
            let title = match existing {
                Some(conversation) if conversation.title.is_some() => None,
                _ => Some(derive_title(prompt, self.defaults.title_chars)),
            };
            repo.create_or_update_conversation(conversation_id, user_uuid, title.as_deref(), None)
                .await?;
            repo.create_message(NewMessage {
                uuid: message_id,
                conversation_uuid: conversation_id,
                user_uuid: self.user_or_default(&request.message.user_uuid),
                task_id: Some(task_id),
                prompt: Some(prompt),
            })
            .await?;
        }

        let answer = match producer.as_ref() {
            Some(stream) => run_streaming(&handle, prompt, stream).await?,
            None => run_blocking(&handle, prompt).await?,
        };

        handle.memory.record_exchange(prompt, &answer).await;
        let turns = handle.memory.turns().await;
        let snapshot = {
            let mut session = handle.session.lock().await;
            session.add_answer(answer.clone());
            // Memory only grows; a concurrent task may already have stored more
            if turns.len() > session.turns.len() {
                session.turns = turns;
            }
            session.clone()
        };
        self.store.save(&snapshot).await?;

        if let Some(repo) = &self.repository {
            let summary = truncate_chars(&answer, self.defaults.summary_chars);
            let summary = (!summary.is_empty()).then_some(summary.as_str());
            repo.update_message(message_id, Some(&answer), summary).await?;
        }

        if let Some(stream) = producer.take() {
            stream.done(answer.clone(), conversation_id);
        }

        info!("Task {} answered ({} chars)", task_id, answer.chars().count());
        Ok(TaskResult {
            text: answer,
            conversation_id: conversation_id.to_string(),
        })
    }

    pub async fn task_status(&self, task_id: &str) -> ServiceResult<TaskStatus> {
        self.tasks.status(task_id).await
    }

    /// Take the event queue of a streaming task. A queue can be read once.
    pub async fn open_stream(&self, task_id: &str) -> ServiceResult<StreamConsumer> {
        self.streams.attach(task_id).await.ok_or_else(|| {
            ServiceError::NotFound("Streaming not available for this task".to_string())
        })
    }

    // ============================================================================
    // Uploads
    // ============================================================================

    pub async fn upload(
        &self,
        audio: Bytes,
        filename: &str,
        user_uuid: &str,
    ) -> ServiceResult<UploadResponse> {
        if audio.is_empty() {
            return Err(ServiceError::Validation("Uploaded file is empty".to_string()));
        }
        let filename = if filename.trim().is_empty() {
            "upload"
        } else {
            filename
        };

        Ok(self
            .ingest
            .upload(audio, filename, self.user_or_default(user_uuid))
            .await?)
    }

    pub async fn processing_status(&self, file_hash: &str) -> ProcessingStatus {
        self.ingest.processing_status(file_hash).await
    }

    // ============================================================================
    // Transcripts
    // ============================================================================

    /// Point a conversation at a transcript file and store its contents
    pub async fn load_transcript(
        &self,
        conversation_id: &str,
        transcript_path: &Path,
    ) -> ServiceResult<TranscriptLoaded> {
        let transcript = match tokio::fs::read_to_string(transcript_path).await {
            Ok(transcript) => transcript,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ServiceError::NotFound(format!(
                    "Transcript file not found: {}",
                    transcript_path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        self.sessions
            .record_transcript_path(conversation_id, transcript_path)
            .await;

        self.sessions
            .replace_transcript(conversation_id, &transcript)
            .await?;

        info!(
            "Loaded transcript for {} from {}",
            conversation_id,
            transcript_path.display()
        );
        Ok(TranscriptLoaded {
            status: "success".to_string(),
            conversation_id: conversation_id.to_string(),
            transcript_length: transcript.chars().count(),
        })
    }

    pub async fn history(&self, conversation_id: &str) -> ServiceResult<ConversationHistory> {
        let session = match self.sessions.get(conversation_id).await {
            Some(handle) => handle.snapshot().await,
            None => self.store.load(conversation_id, "").await?,
        };

        if !session.has_transcript() && session.answers.is_empty() {
            return Err(ServiceError::NotFound("Conversation not found".to_string()));
        }

        Ok(ConversationHistory {
            conversation_id: conversation_id.to_string(),
            transcript_length: session.transcript.chars().count(),
            answers: session.answers,
        })
    }

    // ============================================================================
    // Conversations
    // ============================================================================

    pub async fn list_conversations(
        &self,
        user_uuid: &str,
        limit: i64,
    ) -> ServiceResult<ConversationList> {
        let repo = self.require_repository()?;
        let conversations = repo
            .list_conversations(self.user_or_default(user_uuid), limit)
            .await?;
        Ok(ConversationList { conversations })
    }

    pub async fn list_messages(
        &self,
        conversation_uuid: &str,
        limit: i64,
    ) -> ServiceResult<MessageList> {
        let repo = self.require_repository()?;
        let messages = repo.list_messages(conversation_uuid, limit).await?;
        Ok(MessageList {
            conversation_uuid: conversation_uuid.to_string(),
            messages,
        })
    }

    /// Follow-up prompts cached for the upload a conversation came from
    pub async fn suggestions(&self, conversation_uuid: &str) -> ServiceResult<SuggestionList> {
        let repo = self.require_repository()?;
        let conversation = repo
            .get_conversation(conversation_uuid)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Conversation not found".to_string()))?;

        let suggestions = match conversation.content_hash {
            Some(hash) => self.cache.load_suggestions(&hash).await?.unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(SuggestionList {
            conversation_uuid: conversation_uuid.to_string(),
            suggestions,
        })
    }

    /// Remove a conversation from the repository, the flat store and memory
    pub async fn delete_conversation(&self, conversation_uuid: &str) -> ServiceResult<Deleted> {
        self.sessions.remove(conversation_uuid).await;
        self.store.delete(conversation_uuid).await?;

        if let Some(repo) = &self.repository {
            if !repo.delete_conversation(conversation_uuid).await? {
                return Err(ServiceError::NotFound("Conversation not found".to_string()));
            }
        }

        Ok(Deleted {
            status: "deleted".to_string(),
            conversation_uuid: conversation_uuid.to_string(),
        })
    }

    /// Wipe every user's data and all in-memory state
    pub async fn clear_all(&self, user_uuid: Option<&str>) -> ServiceResult<Cleared> {
        if !self.allow_global_reset {
            return Err(ServiceError::Forbidden(
                "Global reset is disabled; set service.allow_global_reset to enable it"
                    .to_string(),
            ));
        }

        warn!(
            "Global reset requested (user {:?}); wiping all conversations",
            user_uuid
        );

        if let Some(repo) = &self.repository {
            repo.delete_all().await?;
        }
        self.store.clear().await?;
        self.cache.clear().await?;
        self.tasks.clear().await;
        self.streams.clear().await;
        self.sessions.clear().await;
        self.ingest.clear().await;

        Ok(Cleared {
            status: "cleared".to_string(),
        })
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy".to_string(),
            active_conversations: self.sessions.active_count().await,
            active_tasks: self.tasks.active_count().await,
        }
    }
}

fn validate(request: &TaskRequest) -> ServiceResult<()> {
    if request.conversation.uuid.trim().is_empty() {
        return Err(ServiceError::Validation(
            "conversation.uuid is required".to_string(),
        ));
    }
    if request.message.uuid.trim().is_empty() {
        return Err(ServiceError::Validation("message.uuid is required".to_string()));
    }
    if request.message.prompt.trim().is_empty() {
        return Err(ServiceError::Validation("message.prompt is required".to_string()));
    }
    if !request.message.conversation_uuid.is_empty()
        && request.message.conversation_uuid != request.conversation.uuid
    {
        return Err(ServiceError::Validation(
            "message.conversation_uuid does not match conversation.uuid".to_string(),
        ));
    }
    Ok(())
}

async fn run_blocking(handle: &ConversationHandle, prompt: &str) -> Result<String> {
    let result = handle.agent().await.run(prompt, &handle.memory).await?;
    Ok(extract_answer(result.final_output.as_ref(), "", &result.raw))
}

async fn run_streaming(
    handle: &ConversationHandle,
    prompt: &str,
    stream: &StreamProducer,
) -> Result<String> {
    let mut events = handle.agent().await.run_streamed(prompt, &handle.memory).await?;
    let mut accumulated = String::new();
    let mut final_output = None;
    let mut raw = serde_json::Value::Null;

    while let Some(event) = events.next().await {
        match event? {
            RunEvent::TextDelta(delta) => {
                accumulated.push_str(&delta);
                stream.delta(delta, accumulated.clone());
            }
            RunEvent::Item { item_type, data } => stream.event(item_type, data),
            RunEvent::Completed {
                final_output: output,
                raw: run,
            } => {
                final_output = output;
                raw = run;
            }
        }
    }

    Ok(extract_answer(final_output.as_ref(), &accumulated, &raw))
}

/// Leading characters of the prompt, or "Conversation" for a blank prompt
fn derive_title(prompt: &str, max_chars: usize) -> String {
    let title = truncate_chars(prompt.trim(), max_chars);
    if title.is_empty() {
        "Conversation".to_string()
    } else {
        title
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
