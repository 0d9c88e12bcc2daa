// Integration tests for the SQLite metadata repository
//
// Each test opens a fresh database file in a temporary directory.

use anyhow::Result;
use serde_json::json;
use tempfile::TempDir;
use transcript_agent::repository::{ArtifactType, ConversationRepository, NewMessage};

async fn open_repo(dir: &TempDir) -> Result<ConversationRepository> {
    ConversationRepository::open(&dir.path().join("meta").join("conversations.db")).await
}

fn new_message<'a>(uuid: &'a str, conversation_uuid: &'a str, prompt: &'a str) -> NewMessage<'a> {
    NewMessage {
        uuid,
        conversation_uuid,
        user_uuid: "user-1",
        task_id: None,
        prompt: Some(prompt),
    }
}

#[tokio::test]
async fn test_message_count_tracks_messages() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir).await?;

    let created = repo
        .create_or_update_conversation("conv-1", "user-1", Some("Weekly sync"), None)
        .await?;
    assert_eq!(created.message_count, 0);

    for i in 0..3 {
        let uuid = format!("msg-{}", i);
        repo.create_message(new_message(&uuid, "conv-1", "Question?"))
            .await?;
    }
    // Re-submitting an existing message id must not double count
    repo.create_message(new_message("msg-0", "conv-1", "Question, again?"))
        .await?;

    let conversation = repo.get_conversation("conv-1").await?.expect("conversation");
    assert_eq!(conversation.message_count, 3, "Count should equal message rows");
    assert_eq!(repo.list_messages("conv-1", 100).await?.len(), 3);
    assert!(conversation.updated_at >= created.updated_at);

    Ok(())
}

#[tokio::test]
async fn test_upsert_keeps_title_and_never_moves_updated_at_back() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir).await?;

    let first = repo
        .create_or_update_conversation("conv-1", "user-1", Some("meeting.mp3"), Some("abc123"))
        .await?;
    let second = repo
        .create_or_update_conversation("conv-1", "user-1", None, None)
        .await?;

    assert_eq!(second.title.as_deref(), Some("meeting.mp3"));
    assert_eq!(second.content_hash.as_deref(), Some("abc123"));
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at >= first.updated_at);

    Ok(())
}

#[tokio::test]
async fn test_message_round_trip_with_artifacts() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir).await?;

    repo.create_or_update_conversation("conv-1", "user-1", None, None)
        .await?;
    let created = repo
        .create_message(NewMessage {
            uuid: "msg-1",
            conversation_uuid: "conv-1",
            user_uuid: "user-1",
            task_id: Some("task-1"),
            prompt: Some("Chart the revenue"),
        })
        .await?;
    assert_eq!(created.answer, None, "Answer is null until the task completes");

    let updated = repo
        .update_message("msg-1", Some("Revenue grew 10%"), Some("Revenue grew"))
        .await?
        .expect("message");
    assert_eq!(updated.answer.as_deref(), Some("Revenue grew 10%"));

    let chart = repo
        .create_artifact(
            "msg-1",
            ArtifactType::Chart,
            Some("revenue"),
            Some("charts/revenue.png"),
            Some(&json!({"x": [1, 2], "y": [10, 11]})),
        )
        .await?;
    repo.create_artifact("msg-1", ArtifactType::Text, None, None, None)
        .await?;

    let messages = repo.list_messages("conv-1", 100).await?;
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.prompt.as_deref(), Some("Chart the revenue"));
    assert_eq!(message.answer.as_deref(), Some("Revenue grew 10%"));
    assert_eq!(message.summary.as_deref(), Some("Revenue grew"));
    assert_eq!(message.task_id.as_deref(), Some("task-1"));
    assert_eq!(message.artifacts.len(), 2);
    assert_eq!(message.artifacts[0], chart);
    assert_eq!(message.artifacts[1].artifact_type, ArtifactType::Text);
    assert_eq!(message.artifacts[1].data, None);

    let by_task = repo.get_message_by_task_id("task-1").await?.expect("by task");
    assert_eq!(by_task.uuid, "msg-1");
    assert_eq!(by_task.artifacts.len(), 2);

    // Updating with nothing leaves the row alone
    let unchanged = repo.update_message("msg-1", None, None).await?.expect("message");
    assert_eq!(unchanged.answer.as_deref(), Some("Revenue grew 10%"));

    assert!(repo.update_message("missing", Some("x"), None).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_delete_cascades_only_to_own_rows() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir).await?;

    for conv in ["conv-a", "conv-b"] {
        repo.create_or_update_conversation(conv, "user-1", None, None)
            .await?;
        let msg = format!("{}-msg", conv);
        repo.create_message(new_message(&msg, conv, "Hello")).await?;
        repo.create_artifact(&msg, ArtifactType::Table, Some("t"), None, None)
            .await?;
    }

    assert!(repo.delete_conversation("conv-a").await?);
    assert!(!repo.delete_conversation("conv-a").await?, "Second delete finds nothing");

    assert!(repo.get_conversation("conv-a").await?.is_none());
    assert!(repo.get_message("conv-a-msg").await?.is_none());
    assert!(repo.list_artifacts("conv-a-msg").await?.is_empty());

    let survivor = repo.get_conversation("conv-b").await?.expect("conv-b");
    assert_eq!(survivor.message_count, 1);
    assert_eq!(repo.list_artifacts("conv-b-msg").await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_list_conversations_most_recent_first() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir).await?;

    repo.create_or_update_conversation("old", "user-1", None, None)
        .await?;
    repo.create_or_update_conversation("new", "user-1", None, None)
        .await?;
    repo.create_or_update_conversation("other-user", "user-2", None, None)
        .await?;
    // A message append bumps updated_at
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    repo.create_message(new_message("m1", "old", "Bump")).await?;

    let listed = repo.list_conversations("user-1", 100).await?;
    let ids: Vec<&str> = listed.iter().map(|c| c.uuid.as_str()).collect();
    assert_eq!(ids, vec!["old", "new"]);

    assert_eq!(repo.list_conversations("user-1", 1).await?.len(), 1);
    assert!(repo.list_conversations("nobody", 100).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_delete_all_leaves_schema_usable() -> Result<()> {
    let dir = TempDir::new()?;
    let repo = open_repo(&dir).await?;

    repo.create_or_update_conversation("conv-1", "user-1", None, None)
        .await?;
    repo.create_message(new_message("m1", "conv-1", "Hi")).await?;

    repo.delete_all().await?;
    assert!(repo.get_conversation("conv-1").await?.is_none());
    assert!(repo.get_message("m1").await?.is_none());

    repo.create_or_update_conversation("conv-2", "user-1", None, None)
        .await?;
    assert_eq!(repo.list_conversations("user-1", 100).await?.len(), 1);

    Ok(())
}
