pub mod agent;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod ingest;
pub mod repository;
pub mod service;
pub mod store;
pub mod stream;
pub mod tasks;
pub mod transcription;

pub use agent::{
    extract_answer, AgentFactory, ConversationHandle, FinalOutput, ReasoningAgent, RunEvent,
    RunResult, RunStream, SessionManager, SessionMemory,
};
pub use cache::{CacheLookup, ContentHashCache};
pub use client::TranscriptClient;
pub use config::Config;
pub use error::{ServiceError, ServiceResult};
pub use http::{create_router, AppState};
pub use ingest::{Ingestor, ProcessingState, ProcessingStatus, UploadResponse};
pub use repository::{Artifact, ArtifactType, Conversation, ConversationRepository, Message};
pub use service::{Collaborators, TaskRequest, TranscriptService};
pub use store::{AgentSession, TranscriptStore};
pub use stream::{StreamBus, StreamConsumer, StreamEvent, StreamProducer};
pub use tasks::{TaskRegistry, TaskResult, TaskState, TaskStatus};
pub use transcription::{Analyst, Suggestion, Transcriber, Utterance};
