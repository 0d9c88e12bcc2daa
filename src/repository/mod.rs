//! Relational metadata store for conversations, messages and artifacts
//!
//! Backed by a SQLite connection pool. Every call checks a connection out of
//! the pool for its own duration, so concurrent callers (request handlers,
//! background ingestion jobs, task processors) never share a handle.

mod models;

pub use models::{Artifact, ArtifactType, Conversation, Message, NewMessage};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    uuid TEXT PRIMARY KEY,
    user_uuid TEXT NOT NULL,
    title TEXT,
    content_hash TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS messages (
    uuid TEXT PRIMARY KEY,
    conversation_uuid TEXT NOT NULL REFERENCES conversations(uuid) ON DELETE CASCADE,
    user_uuid TEXT NOT NULL,
    task_id TEXT,
    prompt TEXT,
    answer TEXT,
    summary TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS artifacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_uuid TEXT NOT NULL REFERENCES messages(uuid) ON DELETE CASCADE,
    artifact_type TEXT NOT NULL,
    name TEXT,
    path TEXT,
    data TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conv_user ON conversations(user_uuid);
CREATE INDEX IF NOT EXISTS idx_conv_hash ON conversations(content_hash);
CREATE INDEX IF NOT EXISTS idx_msg_conv ON messages(conversation_uuid);
CREATE INDEX IF NOT EXISTS idx_msg_task ON messages(task_id);
CREATE INDEX IF NOT EXISTS idx_art_msg ON artifacts(message_uuid);
"#;

/// Fixed-width timestamps so text comparison matches time order
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp in database: {}", raw))?
        .with_timezone(&Utc))
}

#[derive(Clone)]
pub struct ConversationRepository {
    pool: SqlitePool,
}

impl ConversationRepository {
    /// Open (creating if needed) the database file and ensure the schema exists
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;

        info!("Opened metadata database: {}", db_path.display());

        let repo = Self { pool };
        repo.init_schema().await?;
        Ok(repo)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("Failed to initialize schema")?;
        Ok(())
    }

    // ============ Conversations ============

    /// Insert the conversation, or bump `updated_at` and fill in `title` /
    /// `content_hash` when given
    pub async fn create_or_update_conversation(
        &self,
        conversation_uuid: &str,
        user_uuid: &str,
        title: Option<&str>,
        content_hash: Option<&str>,
    ) -> Result<Conversation> {
        let now = now_timestamp();

        sqlx::query(
            r#"
            INSERT INTO conversations (uuid, user_uuid, title, content_hash, created_at, updated_at, message_count)
            VALUES (?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(uuid) DO UPDATE SET
                title = COALESCE(excluded.title, conversations.title),
                content_hash = COALESCE(excluded.content_hash, conversations.content_hash),
                updated_at = MAX(conversations.updated_at, excluded.updated_at)
            "#,
        )
        .bind(conversation_uuid)
        .bind(user_uuid)
        .bind(title)
        .bind(content_hash)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_conversation(conversation_uuid)
            .await?
            .context("Conversation vanished after upsert")
    }

    pub async fn get_conversation(&self, conversation_uuid: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE uuid = ?")
            .bind(conversation_uuid)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    /// Most recently updated first
    pub async fn list_conversations(&self, user_uuid: &str, limit: i64) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM conversations
            WHERE user_uuid = ?
            ORDER BY updated_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_uuid)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(conversation_from_row).collect()
    }

    /// Delete a conversation with its messages and their artifacts.
    ///
    /// Returns whether the conversation existed.
    pub async fn delete_conversation(&self, conversation_uuid: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM artifacts
            WHERE message_uuid IN (SELECT uuid FROM messages WHERE conversation_uuid = ?)
            "#,
        )
        .bind(conversation_uuid)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM messages WHERE conversation_uuid = ?")
            .bind(conversation_uuid)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM conversations WHERE uuid = ?")
            .bind(conversation_uuid)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        info!("Deleted conversation {} (existed={})", conversation_uuid, deleted > 0);
        Ok(deleted > 0)
    }

    /// Remove every row from every table, for all users
    pub async fn delete_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM artifacts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM messages").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM conversations").execute(&mut *tx).await?;
        tx.commit().await?;

        sqlx::query("VACUUM").execute(&self.pool).await?;
        info!("Metadata repository wiped");
        Ok(())
    }

    // ============ Messages ============

    /// Record a prompt. Re-submitting an existing message id only refreshes
    /// its task id and prompt. The conversation's `message_count` is
    /// recomputed and `updated_at` bumped in the same transaction.
    pub async fn create_message(&self, msg: NewMessage<'_>) -> Result<Message> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages (uuid, conversation_uuid, user_uuid, task_id, prompt, answer, summary, created_at)
            VALUES (?, ?, ?, ?, ?, NULL, NULL, ?)
            ON CONFLICT(uuid) DO UPDATE SET
                task_id = excluded.task_id,
                prompt = excluded.prompt
            "#,
        )
        .bind(msg.uuid)
        .bind(msg.conversation_uuid)
        .bind(msg.user_uuid)
        .bind(msg.task_id)
        .bind(msg.prompt)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to insert message {}", msg.uuid))?;

        sqlx::query(
            r#"
            UPDATE conversations
            SET message_count = (SELECT COUNT(*) FROM messages WHERE conversation_uuid = ?1),
                updated_at = MAX(updated_at, ?2)
            WHERE uuid = ?1
            "#,
        )
        .bind(msg.conversation_uuid)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_message(msg.uuid)
            .await?
            .context("Message vanished after insert")
    }

    /// Set answer and/or summary; `None` leaves the stored value unchanged
    pub async fn update_message(
        &self,
        message_uuid: &str,
        answer: Option<&str>,
        summary: Option<&str>,
    ) -> Result<Option<Message>> {
        if answer.is_some() || summary.is_some() {
            sqlx::query(
                r#"
                UPDATE messages
                SET answer = COALESCE(?, answer),
                    summary = COALESCE(?, summary)
                WHERE uuid = ?
                "#,
            )
            .bind(answer)
            .bind(summary)
            .bind(message_uuid)
            .execute(&self.pool)
            .await?;
        }

        self.get_message(message_uuid).await
    }

    pub async fn get_message(&self, message_uuid: &str) -> Result<Option<Message>> {
        let row = sqlx::query("SELECT * FROM messages WHERE uuid = ?")
            .bind(message_uuid)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut message = message_from_row(&row)?;
        message.artifacts = self.list_artifacts(&message.uuid).await?;
        Ok(Some(message))
    }

    pub async fn get_message_by_task_id(&self, task_id: &str) -> Result<Option<Message>> {
        let uuid: Option<String> = sqlx::query_scalar("SELECT uuid FROM messages WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        match uuid {
            Some(uuid) => self.get_message(&uuid).await,
            None => Ok(None),
        }
    }

    /// Oldest first, each with its artifacts
    pub async fn list_messages(&self, conversation_uuid: &str, limit: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE conversation_uuid = ?
            ORDER BY created_at ASC, rowid ASC
            LIMIT ?
            "#,
        )
        .bind(conversation_uuid)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let artifact_rows = sqlx::query(
            r#"
            SELECT a.* FROM artifacts a
            JOIN messages m ON m.uuid = a.message_uuid
            WHERE m.conversation_uuid = ?
            ORDER BY a.id ASC
            "#,
        )
        .bind(conversation_uuid)
        .fetch_all(&self.pool)
        .await?;

        let mut by_message: HashMap<String, Vec<Artifact>> = HashMap::new();
        for row in &artifact_rows {
            let artifact = artifact_from_row(row)?;
            by_message
                .entry(artifact.message_uuid.clone())
                .or_default()
                .push(artifact);
        }

        rows.iter()
            .map(|row| {
                let mut message = message_from_row(row)?;
                message.artifacts = by_message.remove(&message.uuid).unwrap_or_default();
                Ok(message)
            })
            .collect()
    }

    // ============ Artifacts ============

    pub async fn create_artifact(
        &self,
        message_uuid: &str,
        artifact_type: ArtifactType,
        name: Option<&str>,
        path: Option<&str>,
        data: Option<&serde_json::Value>,
    ) -> Result<Artifact> {
        let now = now_timestamp();
        let data_json = data.map(serde_json::to_string).transpose()?;

        let id = sqlx::query(
            r#"
            INSERT INTO artifacts (message_uuid, artifact_type, name, path, data, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message_uuid)
        .bind(artifact_type.as_str())
        .bind(name)
        .bind(path)
        .bind(&data_json)
        .bind(&now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to attach artifact to message {}", message_uuid))?
        .last_insert_rowid();

        Ok(Artifact {
            id,
            message_uuid: message_uuid.to_string(),
            artifact_type,
            name: name.map(str::to_string),
            path: path.map(str::to_string),
            data: data.cloned(),
            created_at: parse_timestamp(&now)?,
        })
    }

    pub async fn list_artifacts(&self, message_uuid: &str) -> Result<Vec<Artifact>> {
        let rows = sqlx::query("SELECT * FROM artifacts WHERE message_uuid = ? ORDER BY id ASC")
            .bind(message_uuid)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(artifact_from_row).collect()
    }
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation> {
    Ok(Conversation {
        uuid: row.try_get("uuid")?,
        user_uuid: row.try_get("user_uuid")?,
        title: row.try_get("title")?,
        content_hash: row.try_get("content_hash")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
        updated_at: parse_timestamp(row.try_get("updated_at")?)?,
        message_count: row.try_get("message_count")?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        uuid: row.try_get("uuid")?,
        conversation_uuid: row.try_get("conversation_uuid")?,
        user_uuid: row.try_get("user_uuid")?,
        task_id: row.try_get("task_id")?,
        prompt: row.try_get("prompt")?,
        answer: row.try_get("answer")?,
        summary: row.try_get("summary")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
        artifacts: Vec::new(),
    })
}

fn artifact_from_row(row: &SqliteRow) -> Result<Artifact> {
    let artifact_type: String = row.try_get("artifact_type")?;
    let data: Option<String> = row.try_get("data")?;

    Ok(Artifact {
        id: row.try_get("id")?,
        message_uuid: row.try_get("message_uuid")?,
        artifact_type: artifact_type.parse()?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        data: data.as_deref().map(serde_json::from_str).transpose()?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}
