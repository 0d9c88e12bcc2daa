use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Prior turns of one conversation, shared by every run of its agent
#[derive(Debug, Clone, Default)]
pub struct SessionMemory {
    turns: Arc<Mutex<Vec<Turn>>>,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory restored from persisted turns
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self {
            turns: Arc::new(Mutex::new(turns)),
        }
    }

    /// Snapshot of the history, oldest first
    pub async fn turns(&self) -> Vec<Turn> {
        self.turns.lock().await.clone()
    }

    /// Append a completed question/answer pair
    pub async fn record_exchange(&self, prompt: &str, answer: &str) {
        let mut turns = self.turns.lock().await;
        turns.push(Turn {
            role: Role::User,
            content: prompt.to_string(),
        });
        turns.push(Turn {
            role: Role::Assistant,
            content: answer.to_string(),
        });
    }

    pub async fn len(&self) -> usize {
        self.turns.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
