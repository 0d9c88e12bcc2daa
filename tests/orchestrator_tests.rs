// Integration tests for the task orchestrator
//
// Runs the full service with in-process agents against a temporary
// storage root: submission, polling, streaming, persistence and cleanup.

mod common;

use anyhow::Result;
use common::{answer_for, harness, harness_with, test_config, wait_for_task, FAILING_PROMPT};
use tempfile::TempDir;
use transcript_agent::agent::Role;
use transcript_agent::{ServiceError, StreamEvent, TaskRequest, TaskState, TranscriptStore};

#[tokio::test]
async fn test_blocking_task_persists_answer() -> Result<()> {
    let dir = TempDir::new()?;
    let h = harness(dir.path()).await?;

    let transcript_path = dir.path().join("meeting.txt");
    tokio::fs::write(&transcript_path, "[00:00 - 00:01 (Ana)]\n Hello\n\n").await?;

    // Step 1: submit and poll
    let request = TaskRequest::new("conv-1", "msg-1", "Summarize the meeting")
        .with_transcript_path(&transcript_path)
        .with_user("user-1");
    let created = h.service.submit_task(request).await?;
    let status = wait_for_task(&h.service, &created.task_id).await?;

    assert_eq!(status.status, TaskState::Success);
    let result = status.result.expect("result");
    assert_eq!(result.text, answer_for("Summarize the meeting"));
    assert_eq!(result.conversation_id, "conv-1");

    // Step 2: the agent was built with the transcript file
    assert_eq!(
        h.agents.transcript_for("conv-1").as_deref(),
        Some("[00:00 - 00:01 (Ana)]\n Hello\n\n")
    );

    // Step 3: flat store holds the answer
    let history = h.service.history("conv-1").await?;
    assert_eq!(history.answers, vec![answer_for("Summarize the meeting")]);
    assert!(history.transcript_length > 0);

    // Step 4: metadata repository records the exchange
    let repo = h.service.repository().expect("repository enabled");
    let conversation = repo.get_conversation("conv-1").await?.expect("conversation");
    assert_eq!(conversation.message_count, 1);
    assert_eq!(conversation.user_uuid, "user-1");
    assert_eq!(conversation.title.as_deref(), Some("Summarize the meeting"));

    let message = repo
        .get_message_by_task_id(&created.task_id)
        .await?
        .expect("message by task id");
    assert_eq!(message.uuid, "msg-1");
    assert_eq!(message.prompt.as_deref(), Some("Summarize the meeting"));
    assert_eq!(message.answer.as_deref(), Some(result.text.as_str()));
    assert_eq!(message.summary.as_deref(), Some(result.text.as_str()));

    Ok(())
}

#[tokio::test]
async fn test_follow_up_reuses_agent_and_keeps_title() -> Result<()> {
    let dir = TempDir::new()?;
    let h = harness(dir.path()).await?;

    let first = h
        .service
        .submit_task(TaskRequest::new("conv-1", "msg-1", "First question"))
        .await?;
    wait_for_task(&h.service, &first.task_id).await?;

    let second = h
        .service
        .submit_task(TaskRequest::new("conv-1", "msg-2", "Second question"))
        .await?;
    wait_for_task(&h.service, &second.task_id).await?;

    assert_eq!(h.agents.created_count(), 1, "One agent per conversation");

    let history = h.service.history("conv-1").await?;
    assert_eq!(
        history.answers,
        vec![answer_for("First question"), answer_for("Second question")]
    );

    let repo = h.service.repository().expect("repository");
    let conversation = repo.get_conversation("conv-1").await?.expect("conversation");
    assert_eq!(conversation.message_count, 2);
    assert_eq!(conversation.title.as_deref(), Some("First question"));

    Ok(())
}

#[tokio::test]
async fn test_streaming_task_emits_ordered_events() -> Result<()> {
    let dir = TempDir::new()?;
    let h = harness(dir.path()).await?;

    let created = h
        .service
        .submit_task(TaskRequest::new("conv-1", "msg-1", "Summarize").streaming())
        .await?;
    let mut consumer = h.service.open_stream(&created.task_id).await?;

    let mut events = Vec::new();
    while let Some(event) = consumer.next().await {
        events.push(event);
    }

    let answer = answer_for("Summarize");
    assert_eq!(
        events,
        vec![
            StreamEvent::Delta {
                delta: "Answer ".to_string(),
                accumulated: "Answer ".to_string()
            },
            StreamEvent::Event {
                event_type: "tool_call_item".to_string(),
                data: "lookup(transcript)".to_string()
            },
            StreamEvent::Delta {
                delta: "to: ".to_string(),
                accumulated: "Answer to: ".to_string()
            },
            StreamEvent::Delta {
                delta: "Summarize".to_string(),
                accumulated: answer.clone()
            },
            StreamEvent::Done {
                text: answer.clone(),
                conversation_id: "conv-1".to_string()
            },
            StreamEvent::End,
        ]
    );

    let status = wait_for_task(&h.service, &created.task_id).await?;
    assert_eq!(status.status, TaskState::Success);
    assert_eq!(status.result.expect("result").text, answer);

    // The queue is single-use
    let err = h
        .service
        .open_stream(&created.task_id)
        .await
        .expect_err("queue already taken");
    assert!(matches!(err, ServiceError::NotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_streaming_without_transcript_still_answers() -> Result<()> {
    let dir = TempDir::new()?;
    let h = harness(dir.path()).await?;

    let created = h
        .service
        .submit_task(TaskRequest::new("conv-empty", "msg-1", "Anything there?").streaming())
        .await?;
    let mut consumer = h.service.open_stream(&created.task_id).await?;

    let mut last_before_end = None;
    while let Some(event) = consumer.next().await {
        if event != StreamEvent::End {
            last_before_end = Some(event);
        }
    }
    assert!(matches!(last_before_end, Some(StreamEvent::Done { .. })));

    let status = wait_for_task(&h.service, &created.task_id).await?;
    assert_eq!(status.status, TaskState::Success);
    assert_eq!(h.agents.transcript_for("conv-empty").as_deref(), Some(""));

    let history = h.service.history("conv-empty").await?;
    assert_eq!(history.transcript_length, 0);
    assert_eq!(history.answers.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_failed_task_reports_error() -> Result<()> {
    let dir = TempDir::new()?;
    let h = harness(dir.path()).await?;

    // Blocking
    let created = h
        .service
        .submit_task(TaskRequest::new("conv-1", "msg-1", FAILING_PROMPT))
        .await?;
    let status = wait_for_task(&h.service, &created.task_id).await?;
    assert_eq!(status.status, TaskState::Failed);
    assert!(status.result.is_none());
    assert!(status.failure.unwrap_or_default().contains("500"));

    // Streaming: partial delta, one error, then end
    let created = h
        .service
        .submit_task(TaskRequest::new("conv-1", "msg-2", FAILING_PROMPT).streaming())
        .await?;
    let mut consumer = h.service.open_stream(&created.task_id).await?;
    let mut events = Vec::new();
    while let Some(event) = consumer.next().await {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(StreamEvent::Delta { .. })));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    match &events[events.len() - 2] {
        StreamEvent::Error { error } => assert!(error.contains("Reasoning stream broke")),
        other => panic!("Expected an error event, got {:?}", other),
    }
    assert_eq!(events.last(), Some(&StreamEvent::End));

    let status = wait_for_task(&h.service, &created.task_id).await?;
    assert_eq!(status.status, TaskState::Failed);

    // Failed answers are not persisted
    let err = h.service.history("conv-1").await.expect_err("nothing stored");
    assert!(matches!(err, ServiceError::NotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let h = harness(dir.path()).await?;

    let mut mismatched = TaskRequest::new("conv-1", "msg-1", "Question?");
    mismatched.message.conversation_uuid = "conv-2".to_string();

    for request in [
        TaskRequest::new("", "msg-1", "Question?"),
        TaskRequest::new("conv-1", "", "Question?"),
        TaskRequest::new("conv-1", "msg-1", "   "),
        mismatched,
    ] {
        let err = h.service.submit_task(request).await.expect_err("invalid");
        assert!(matches!(err, ServiceError::Validation(_)), "Got {}", err);
    }
    assert_eq!(h.service.health().await.active_tasks, 0);

    let err = h.service.task_status("no-such-task").await.expect_err("unknown");
    assert!(matches!(err, ServiceError::NotFound(_)));

    let err = h
        .service
        .open_stream("no-such-task")
        .await
        .expect_err("no queue");
    assert!(matches!(err, ServiceError::NotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_load_transcript_replaces_live_session() -> Result<()> {
    let dir = TempDir::new()?;
    let h = harness(dir.path()).await?;

    let err = h
        .service
        .load_transcript("conv-1", &dir.path().join("missing.txt"))
        .await
        .expect_err("missing file");
    assert!(matches!(err, ServiceError::NotFound(_)));

    let created = h
        .service
        .submit_task(TaskRequest::new("conv-1", "msg-1", "Hello?"))
        .await?;
    wait_for_task(&h.service, &created.task_id).await?;

    let path = dir.path().join("new.txt");
    tokio::fs::write(&path, "New transcript").await?;
    let loaded = h.service.load_transcript("conv-1", &path).await?;
    assert_eq!(loaded.status, "success");
    assert_eq!(loaded.transcript_length, "New transcript".len());

    // A later answer must not bring back the old transcript
    let created = h
        .service
        .submit_task(TaskRequest::new("conv-1", "msg-2", "Again?"))
        .await?;
    wait_for_task(&h.service, &created.task_id).await?;

    let history = h.service.history("conv-1").await?;
    assert_eq!(history.transcript_length, "New transcript".len());
    assert_eq!(history.answers.len(), 2);

    // The live agent was rebuilt for the new transcript with its memory intact
    assert_eq!(
        h.agents.transcript_for("conv-1").as_deref(),
        Some("New transcript")
    );
    assert_eq!(h.agents.created_count(), 2);
    let store = TranscriptStore::new(h.config.storage.conversations_dir.clone());
    let turns = store.load("conv-1", "").await?.turns;
    assert_eq!(turns.len(), 4, "Both exchanges remembered across the reload");

    Ok(())
}

#[tokio::test]
async fn test_memory_survives_restart() -> Result<()> {
    let dir = TempDir::new()?;

    // Step 1: first process answers one question
    {
        let h = harness(dir.path()).await?;
        let created = h
            .service
            .submit_task(TaskRequest::new("conv-1", "msg-1", "First question"))
            .await?;
        wait_for_task(&h.service, &created.task_id).await?;
    }

    // Step 2: a fresh service on the same storage root continues the conversation
    let h = harness(dir.path()).await?;
    let created = h
        .service
        .submit_task(TaskRequest::new("conv-1", "msg-2", "Second question"))
        .await?;
    wait_for_task(&h.service, &created.task_id).await?;

    let store = TranscriptStore::new(h.config.storage.conversations_dir.clone());
    let session = store.load("conv-1", "").await?;
    let turns: Vec<(Role, &str)> = session
        .turns
        .iter()
        .map(|t| (t.role, t.content.as_str()))
        .collect();
    let first = answer_for("First question");
    let second = answer_for("Second question");
    assert_eq!(
        turns,
        vec![
            (Role::User, "First question"),
            (Role::Assistant, first.as_str()),
            (Role::User, "Second question"),
            (Role::Assistant, second.as_str()),
        ]
    );

    // Step 3: deleting the conversation forgets its memory
    h.service.delete_conversation("conv-1").await?;
    assert!(store.load("conv-1", "").await?.turns.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_delete_conversation() -> Result<()> {
    let dir = TempDir::new()?;
    let h = harness(dir.path()).await?;

    let created = h
        .service
        .submit_task(TaskRequest::new("conv-1", "msg-1", "Hello?"))
        .await?;
    wait_for_task(&h.service, &created.task_id).await?;
    assert_eq!(h.service.health().await.active_conversations, 1);

    let deleted = h.service.delete_conversation("conv-1").await?;
    assert_eq!(deleted.status, "deleted");
    assert_eq!(h.service.health().await.active_conversations, 0);
    assert!(h.service.history("conv-1").await.is_err());
    assert!(h.service.list_messages("conv-1", 100).await?.messages.is_empty());

    let err = h
        .service
        .delete_conversation("conv-1")
        .await
        .expect_err("already gone");
    assert!(matches!(err, ServiceError::NotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_global_reset_is_gated() -> Result<()> {
    let dir = TempDir::new()?;
    let h = harness(dir.path()).await?;

    let err = h.service.clear_all(Some("user-1")).await.expect_err("disabled");
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let mut config = test_config(dir.path());
    config.service.allow_global_reset = true;
    let h = harness_with(config, Default::default()).await?;

    let created = h
        .service
        .submit_task(TaskRequest::new("conv-1", "msg-1", "Hello?"))
        .await?;
    wait_for_task(&h.service, &created.task_id).await?;

    let cleared = h.service.clear_all(None).await?;
    assert_eq!(cleared.status, "cleared");
    assert!(h.service.history("conv-1").await.is_err());
    assert!(h.service.list_conversations("", 100).await?.conversations.is_empty());
    assert!(h.service.task_status(&created.task_id).await.is_err());

    let health = h.service.health().await;
    assert_eq!(health.active_conversations, 0);
    assert_eq!(health.active_tasks, 0);

    Ok(())
}

#[tokio::test]
async fn test_runs_without_repository() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = test_config(dir.path());
    config.storage.repository_enabled = false;
    let h = harness_with(config, Default::default()).await?;
    assert!(h.service.repository().is_none());

    let created = h
        .service
        .submit_task(TaskRequest::new("conv-1", "msg-1", "Hello?"))
        .await?;
    let status = wait_for_task(&h.service, &created.task_id).await?;
    assert_eq!(status.status, TaskState::Success);

    for err in [
        h.service.list_conversations("user-1", 10).await.expect_err("no repo"),
        h.service.list_messages("conv-1", 10).await.expect_err("no repo"),
        h.service.suggestions("conv-1").await.expect_err("no repo"),
    ] {
        assert!(matches!(err, ServiceError::Unavailable(_)));
    }

    // Deletion still clears the flat store
    h.service.delete_conversation("conv-1").await?;
    assert!(h.service.history("conv-1").await.is_err());

    Ok(())
}

#[tokio::test]
async fn test_health_counts() -> Result<()> {
    let dir = TempDir::new()?;
    let h = harness(dir.path()).await?;

    let health = h.service.health().await;
    assert_eq!(health.status, "healthy");
    assert_eq!(health.active_conversations, 0);

    for conv in ["conv-a", "conv-b"] {
        let created = h
            .service
            .submit_task(TaskRequest::new(conv, format!("{}-msg", conv), "Hello?"))
            .await?;
        wait_for_task(&h.service, &created.task_id).await?;
    }

    let health = h.service.health().await;
    assert_eq!(health.active_conversations, 2);
    assert_eq!(health.active_tasks, 0);

    Ok(())
}
