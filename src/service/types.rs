use crate::repository::{Conversation, Message};
use crate::transcription::Suggestion;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Conversation a task belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRef {
    pub uuid: String,
    #[serde(default)]
    pub user_uuid: String,
}

/// The question a task answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRef {
    pub uuid: String,
    #[serde(default)]
    pub user_uuid: String,
    #[serde(default)]
    pub conversation_uuid: String,
    pub prompt: String,
}

/// Body of `POST /transcript/task`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub conversation: ConversationRef,
    pub message: MessageRef,
    /// Transcript file to use when the conversation has none yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
    #[serde(default)]
    pub stream: bool,
}

impl TaskRequest {
    pub fn new(
        conversation_uuid: impl Into<String>,
        message_uuid: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        let conversation_uuid = conversation_uuid.into();
        Self {
            conversation: ConversationRef {
                uuid: conversation_uuid.clone(),
                user_uuid: String::new(),
            },
            message: MessageRef {
                uuid: message_uuid.into(),
                user_uuid: String::new(),
                conversation_uuid,
                prompt: prompt.into(),
            },
            transcript_path: None,
            stream: false,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_transcript_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.transcript_path = Some(path.into());
        self
    }

    pub fn with_user(mut self, user_uuid: impl Into<String>) -> Self {
        let user_uuid = user_uuid.into();
        self.conversation.user_uuid = user_uuid.clone();
        self.message.user_uuid = user_uuid;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLoaded {
    pub status: String,
    pub conversation_id: String,
    pub transcript_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub conversation_id: String,
    pub transcript_length: usize,
    pub answers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub active_conversations: usize,
    pub active_tasks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationList {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageList {
    pub conversation_uuid: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionList {
    pub conversation_uuid: String,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deleted {
    pub status: String,
    pub conversation_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cleared {
    pub status: String,
}
