use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A durable thread of questions and answers anchored to one transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub uuid: String,
    pub user_uuid: String,
    pub title: Option<String>,
    /// Fingerprint of the upload this conversation was created from
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of messages referencing this conversation
    pub message_count: i64,
}

/// One prompt and, once its task completes, its answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub uuid: String,
    pub conversation_uuid: String,
    pub user_uuid: String,
    /// Task that produced (or is producing) the answer
    pub task_id: Option<String>,
    pub prompt: Option<String>,
    /// Null until the task completes
    pub answer: Option<String>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub artifacts: Vec<Artifact>,
}

/// Fields needed to record a freshly submitted prompt
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub uuid: &'a str,
    pub conversation_uuid: &'a str,
    pub user_uuid: &'a str,
    pub task_id: Option<&'a str>,
    pub prompt: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Chart,
    Table,
    Dataset,
    Text,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Chart => "chart",
            ArtifactType::Table => "table",
            ArtifactType::Dataset => "dataset",
            ArtifactType::Text => "text",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chart" => Ok(ArtifactType::Chart),
            "table" => Ok(ArtifactType::Table),
            "dataset" => Ok(ArtifactType::Dataset),
            "text" => Ok(ArtifactType::Text),
            other => anyhow::bail!("Unknown artifact type: {}", other),
        }
    }
}

/// Output attached to a message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: i64,
    pub message_uuid: String,
    pub artifact_type: ArtifactType,
    pub name: Option<String>,
    pub path: Option<String>,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
