use super::{AgentFactory, ReasoningAgent, SessionMemory};
use crate::store::{AgentSession, TranscriptStore};
use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info, warn};

/// Live state of one conversation: its agent, its turn history and its
/// persisted transcript/answers record
pub struct ConversationHandle {
    pub conversation_id: String,
    /// Replaced whenever the conversation's transcript changes
    agent: RwLock<Arc<dyn ReasoningAgent>>,
    pub memory: SessionMemory,
    pub session: Mutex<AgentSession>,
}

impl ConversationHandle {
    /// Agent seeded with the current transcript
    pub async fn agent(&self) -> Arc<dyn ReasoningAgent> {
        Arc::clone(&*self.agent.read().await)
    }

    /// Copy of the session record, taken without holding the lock afterwards
    pub async fn snapshot(&self) -> AgentSession {
        self.session.lock().await.clone()
    }
}

type Slot = Arc<OnceCell<Arc<ConversationHandle>>>;

/// Keeps at most one live agent per conversation id.
///
/// Handles are never evicted except by [`SessionManager::remove`] and
/// [`SessionManager::clear`]. Concurrent requests for the same conversation
/// share the same handle without further serialization.
pub struct SessionManager {
    factory: Arc<dyn AgentFactory>,
    store: Arc<TranscriptStore>,
    /// Default transcript location: `<dir>/<conversation_id>.txt`
    transcripts_dir: PathBuf,
    handles: RwLock<HashMap<String, Slot>>,
    transcript_paths: RwLock<HashMap<String, PathBuf>>,
}

impl SessionManager {
    pub fn new(
        factory: Arc<dyn AgentFactory>,
        store: Arc<TranscriptStore>,
        transcripts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            factory,
            store,
            transcripts_dir: transcripts_dir.into(),
            handles: RwLock::new(HashMap::new()),
            transcript_paths: RwLock::new(HashMap::new()),
        }
    }

    /// Remember where the transcript for `conversation_id` lives
    pub async fn record_transcript_path(&self, conversation_id: &str, path: impl Into<PathBuf>) {
        self.transcript_paths
            .write()
            .await
            .insert(conversation_id.to_string(), path.into());
    }

    pub async fn transcript_path(&self, conversation_id: &str) -> Option<PathBuf> {
        self.transcript_paths.read().await.get(conversation_id).cloned()
    }

    fn default_transcript_path(&self, conversation_id: &str) -> PathBuf {
        self.transcripts_dir.join(format!("{}.txt", conversation_id))
    }

    /// Return the conversation's live handle, building it on first use.
    ///
    /// The handle's active message id is set to `message_id` either way.
    pub async fn get_or_create(
        &self,
        conversation_id: &str,
        message_id: &str,
        transcript_path: Option<&Path>,
    ) -> Result<Arc<ConversationHandle>> {
        if let Some(path) = transcript_path {
            self.record_transcript_path(conversation_id, path).await;
        }

        let slot = {
            let mut handles = self.handles.write().await;
            Arc::clone(handles.entry(conversation_id.to_string()).or_default())
        };

        let handle = slot
            .get_or_try_init(|| self.build(conversation_id, message_id, transcript_path))
            .await?;

        let blank = {
            let mut session = handle.session.lock().await;
            session.message_id = message_id.to_string();
            !session.has_transcript()
        };
        if blank {
            self.refresh(handle).await?;
        }
        Ok(Arc::clone(handle))
    }

    /// Pick up a transcript stored after a blank handle was built
    async fn refresh(&self, handle: &ConversationHandle) -> Result<()> {
        let stored = self.store.load(&handle.conversation_id, "").await?;
        if stored.has_transcript() {
            info!(
                "Transcript for {} arrived after its agent was built; rebuilding",
                handle.conversation_id
            );
            self.reseed(handle, &stored.transcript).await?;
        }
        Ok(())
    }

    /// Rebuild the handle's agent for `transcript` and record it in the session.
    /// Memory is kept.
    async fn reseed(&self, handle: &ConversationHandle, transcript: &str) -> Result<AgentSession> {
        if !transcript.trim().is_empty() {
            let agent = self
                .factory
                .create(&handle.conversation_id, transcript)
                .await?;
            *handle.agent.write().await = agent;
        }
        let mut session = handle.session.lock().await;
        session.set_transcript(transcript);
        Ok(session.clone())
    }

    /// Store a new transcript for `conversation_id`.
    ///
    /// A live conversation gets a fresh agent for the new transcript and keeps
    /// its memory; otherwise only the stored record changes.
    pub async fn replace_transcript(
        &self,
        conversation_id: &str,
        transcript: &str,
    ) -> Result<AgentSession> {
        let session = match self.get(conversation_id).await {
            Some(handle) => self.reseed(&handle, transcript).await?,
            None => {
                let mut session = self.store.load(conversation_id, "").await?;
                session.set_transcript(transcript);
                session
            }
        };
        self.store.save(&session).await?;
        Ok(session)
    }

    async fn build(
        &self,
        conversation_id: &str,
        message_id: &str,
        explicit_path: Option<&Path>,
    ) -> Result<Arc<ConversationHandle>> {
        let mut session = self.store.load(conversation_id, message_id).await?;

        if !session.has_transcript() {
            let path = match explicit_path {
                Some(path) => path.to_path_buf(),
                None => match self.transcript_path(conversation_id).await {
                    Some(path) => path,
                    None => self.default_transcript_path(conversation_id),
                },
            };

            match tokio::fs::read_to_string(&path).await {
                Ok(transcript) => {
                    debug!(
                        "Loaded transcript for {} from {}",
                        conversation_id,
                        path.display()
                    );
                    if session.set_transcript(transcript) {
                        self.store.save(&session).await?;
                    }
                }
                Err(e) => {
                    warn!(
                        "No transcript for conversation {} at {}: {}; starting with an empty transcript",
                        conversation_id,
                        path.display(),
                        e
                    );
                }
            }
        }

        let agent = self.factory.create(conversation_id, &session.transcript).await?;
        info!(
            "Created {} for conversation {}",
            agent.name(),
            conversation_id
        );

        let memory = SessionMemory::from_turns(session.turns.clone());
        if !memory.is_empty().await {
            info!(
                "Restored {} turns for conversation {}",
                memory.len().await,
                conversation_id
            );
        }

        Ok(Arc::new(ConversationHandle {
            conversation_id: conversation_id.to_string(),
            agent: RwLock::new(agent),
            memory,
            session: Mutex::new(session),
        }))
    }

    /// Live handle for `conversation_id`, if one has been built
    pub async fn get(&self, conversation_id: &str) -> Option<Arc<ConversationHandle>> {
        let slot = self.handles.read().await.get(conversation_id).cloned()?;
        slot.get().cloned()
    }

    pub async fn remove(&self, conversation_id: &str) {
        self.handles.write().await.remove(conversation_id);
        self.transcript_paths.write().await.remove(conversation_id);
    }

    pub async fn clear(&self) {
        self.handles.write().await.clear();
        self.transcript_paths.write().await.clear();
    }

    /// Number of conversations with a live agent
    pub async fn active_count(&self) -> usize {
        self.handles
            .read()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }
}
