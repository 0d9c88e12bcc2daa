//! HTTP API for uploads and transcript questions
//!
//! This module exposes the orchestrator over REST:
//! - POST /conversations/upload - Upload audio (deduplicated by content hash)
//! - GET /conversations/processing/:file_hash - Poll ingestion progress
//! - POST /transcript/task - Ask a question, returns a task id
//! - GET /transcript/task/:task_id - Poll task status
//! - GET /transcript/task/:task_id/stream - Server-sent answer stream
//! - GET /conversations/list, /conversations/:uuid/messages - Metadata queries
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
