use crate::service::TranscriptService;
use std::sync::Arc;

const DEFAULT_UPLOAD_LIMIT_MB: usize = 512;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Orchestrator owning tasks, sessions, streams and stores
    pub service: Arc<TranscriptService>,

    /// Largest accepted upload body, in bytes
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(service: Arc<TranscriptService>) -> Self {
        Self {
            service,
            max_upload_bytes: DEFAULT_UPLOAD_LIMIT_MB * 1024 * 1024,
        }
    }

    pub fn with_upload_limit_mb(mut self, megabytes: usize) -> Self {
        self.max_upload_bytes = megabytes * 1024 * 1024;
        self
    }
}
