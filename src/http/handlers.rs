use super::state::AppState;
use crate::error::{ServiceError, ServiceResult};
use crate::ingest::{ProcessingStatus, UploadResponse};
use crate::service::{
    Cleared, ConversationHistory, ConversationList, Deleted, HealthReport, MessageList,
    SuggestionList, TaskCreated, TaskRequest, TranscriptLoaded,
};
use crate::tasks::TaskStatus;
use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::HeaderName,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
};
use serde::Deserialize;
use std::convert::Infallible;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const DEFAULT_LIST_LIMIT: i64 = 100;

// ============================================================================
// Query Parameters
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoadTranscriptQuery {
    pub conversation_id: String,
    pub transcript_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    #[serde(default)]
    pub user_uuid: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ClearQuery {
    #[serde(default)]
    pub user_uuid: Option<String>,
}

// ============================================================================
// Tasks
// ============================================================================

/// POST /transcript/task
/// Submit a question about a conversation's transcript
pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<TaskRequest>,
) -> ServiceResult<Json<TaskCreated>> {
    let created = state.service.submit_task(req).await?;
    Ok(Json(created))
}

/// GET /transcript/task/:task_id
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ServiceResult<Json<TaskStatus>> {
    Ok(Json(state.service.task_status(&task_id).await?))
}

/// GET /transcript/task/:task_id/stream
/// Server-sent events for a streaming task, closed by `{"type":"end"}`
pub async fn stream_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ServiceResult<impl IntoResponse> {
    let mut consumer = state.service.open_stream(&task_id).await?;
    info!("Stream reader attached to task {}", task_id);

    let events = async_stream::stream! {
        while let Some(event) = consumer.next().await {
            match Event::default().json_data(&event) {
                Ok(sse) => yield Ok::<_, Infallible>(sse),
                Err(e) => warn!("Failed to encode stream event for {}: {}", consumer.task_id(), e),
            }
        }
        debug!("Stream for task {} finished", consumer.task_id());
    };

    Ok((
        [(HeaderName::from_static("x-accel-buffering"), "no")],
        Sse::new(events).keep_alive(KeepAlive::default()),
    ))
}

// ============================================================================
// Transcripts
// ============================================================================

/// POST /transcript/load?conversation_id=&transcript_path=
pub async fn load_transcript(
    State(state): State<AppState>,
    Query(query): Query<LoadTranscriptQuery>,
) -> ServiceResult<Json<TranscriptLoaded>> {
    let loaded = state
        .service
        .load_transcript(&query.conversation_id, &query.transcript_path)
        .await?;
    Ok(Json(loaded))
}

/// GET /transcript/history/:conversation_id
pub async fn get_history(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ServiceResult<Json<ConversationHistory>> {
    Ok(Json(state.service.history(&conversation_id).await?))
}

// ============================================================================
// Uploads
// ============================================================================

/// POST /conversations/upload
/// Multipart form: `file` (audio bytes) and optional `user_uuid`
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ServiceResult<Json<UploadResponse>> {
    let mut audio: Option<(String, Bytes)> = None;
    let mut user_uuid = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::Validation(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    ServiceError::Validation(format!("Failed to read uploaded file: {}", e))
                })?;
                audio = Some((filename, bytes));
            }
            Some("user_uuid") => {
                user_uuid = field.text().await.map_err(|e| {
                    ServiceError::Validation(format!("Failed to read user_uuid: {}", e))
                })?;
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let (filename, bytes) =
        audio.ok_or_else(|| ServiceError::Validation("Missing file field".to_string()))?;
    info!("Upload received: {} ({} bytes)", filename, bytes.len());

    let response = state.service.upload(bytes, &filename, &user_uuid).await?;
    Ok(Json(response))
}

/// GET /conversations/processing/:file_hash
pub async fn get_processing_status(
    State(state): State<AppState>,
    Path(file_hash): Path<String>,
) -> Json<ProcessingStatus> {
    Json(state.service.processing_status(&file_hash).await)
}

// ============================================================================
// Conversations
// ============================================================================

/// GET /conversations/list?user_uuid=&limit=
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListConversationsQuery>,
) -> ServiceResult<Json<ConversationList>> {
    let list = state
        .service
        .list_conversations(
            query.user_uuid.as_deref().unwrap_or_default(),
            query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )
        .await?;
    Ok(Json(list))
}

/// GET /conversations/:conversation_uuid/messages?limit=
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_uuid): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ServiceResult<Json<MessageList>> {
    let list = state
        .service
        .list_messages(&conversation_uuid, query.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .await?;
    Ok(Json(list))
}

/// GET /conversations/:conversation_uuid/suggestions
pub async fn get_suggestions(
    State(state): State<AppState>,
    Path(conversation_uuid): Path<String>,
) -> ServiceResult<Json<SuggestionList>> {
    Ok(Json(state.service.suggestions(&conversation_uuid).await?))
}

/// DELETE /conversations/:conversation_uuid
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_uuid): Path<String>,
) -> ServiceResult<Json<Deleted>> {
    info!("Deleting conversation {}", conversation_uuid);
    Ok(Json(
        state.service.delete_conversation(&conversation_uuid).await?,
    ))
}

/// DELETE /conversations/clear?user_uuid=
/// Destructive reset of every user's data; refused unless enabled in config
pub async fn clear_all(
    State(state): State<AppState>,
    Query(query): Query<ClearQuery>,
) -> ServiceResult<Json<Cleared>> {
    Ok(Json(
        state.service.clear_all(query.user_uuid.as_deref()).await?,
    ))
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.service.health().await)
}
