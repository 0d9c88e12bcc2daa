//! Flat per-conversation transcript store
//!
//! Each conversation id maps to one JSON file `{transcript, answers, turns}` that is
//! rewritten on every mutation and loaded lazily on first use. This store is
//! independent of the metadata repository and is the source of truth for a
//! conversation's transcript and answer history.

use crate::agent::Turn;
use crate::cache::{clear_dir, write_atomically};
use crate::error::ServiceError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Persisted transcript and answer history for one conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSession {
    /// Conversation this session belongs to
    #[serde(skip)]
    pub conversation_id: String,

    /// Message the next answer will be recorded against
    #[serde(skip)]
    pub message_id: String,

    /// Transcript used as the agent's context
    #[serde(default)]
    pub transcript: String,

    /// Answers produced so far, oldest first
    #[serde(default)]
    pub answers: Vec<String>,

    /// Agent memory: every prompt and answer, oldest first
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl AgentSession {
    pub fn new(conversation_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
            ..Default::default()
        }
    }

    /// Seed the transcript. A non-empty transcript is never replaced by a blank one.
    ///
    /// Returns whether the transcript changed.
    pub fn set_transcript(&mut self, transcript: impl Into<String>) -> bool {
        let transcript = transcript.into();
        if transcript.trim().is_empty() && !self.transcript.trim().is_empty() {
            warn!(
                "Ignoring blank transcript for conversation {}",
                self.conversation_id
            );
            return false;
        }
        self.transcript = transcript;
        true
    }

    pub fn has_transcript(&self) -> bool {
        !self.transcript.trim().is_empty()
    }

    pub fn add_answer(&mut self, answer: impl Into<String>) {
        self.answers.push(answer.into());
    }
}

pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, conversation_id: &str) -> Result<PathBuf> {
        if conversation_id.is_empty()
            || conversation_id.contains(['/', '\\'])
            || conversation_id.contains("..")
        {
            return Err(ServiceError::Validation(format!(
                "Invalid conversation id: {:?}",
                conversation_id
            ))
            .into());
        }
        Ok(self.dir.join(conversation_id))
    }

    /// Load the session for `conversation_id`; a missing file yields an empty session
    pub async fn load(&self, conversation_id: &str, message_id: &str) -> Result<AgentSession> {
        let path = self.path(conversation_id)?;
        let mut session = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<AgentSession>(&raw)
                .with_context(|| format!("Corrupt session file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No stored session for conversation {}", conversation_id);
                AgentSession::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        session.conversation_id = conversation_id.to_string();
        session.message_id = message_id.to_string();
        Ok(session)
    }

    /// Persist `session`. A blank transcript never replaces a stored one: the
    /// stored transcript is carried into the written record instead.
    pub async fn save(&self, session: &AgentSession) -> Result<()> {
        let path = self.path(&session.conversation_id)?;

        let payload = if session.has_transcript() {
            serde_json::to_vec(session)?
        } else {
            let stored = self.load(&session.conversation_id, "").await?;
            if stored.has_transcript() {
                warn!(
                    "Keeping stored transcript for conversation {} over a blank one",
                    session.conversation_id
                );
                let mut merged = session.clone();
                merged.transcript = stored.transcript;
                serde_json::to_vec(&merged)?
            } else {
                serde_json::to_vec(session)?
            }
        };

        write_atomically(&path, &payload).await?;
        debug!(
            "Saved session for conversation {} ({} answers)",
            session.conversation_id,
            session.answers.len()
        );
        Ok(())
    }

    pub async fn delete(&self, conversation_id: &str) -> Result<()> {
        let path = self.path(conversation_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted session file for conversation {}", conversation_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    /// Remove every conversation file
    pub async fn clear(&self) -> Result<()> {
        clear_dir(&self.dir).await
    }
}
