// HTTP client for the transcript service
//
// Wraps the REST surface with typed requests. `poll_task` enforces a
// caller-side deadline; the server keeps working on the task regardless.

use crate::config::Config;
use crate::error::{ServiceError, ServiceResult};
use crate::ingest::{ProcessingState, ProcessingStatus, UploadResponse};
use crate::service::{
    ConversationList, HealthReport, MessageList, SuggestionList, TaskCreated, TaskRequest,
};
use crate::stream::StreamEvent;
use crate::tasks::TaskStatus;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub struct TranscriptClient {
    http: reqwest::Client,
    base_url: String,
    poll_interval: Duration,
    /// Deadline used by [`TranscriptClient::wait_for_task`]
    poll_timeout: Duration,
}

impl TranscriptClient {
    pub fn new(base_url: impl Into<String>) -> ServiceResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ServiceError::Validation(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(2000),
            poll_timeout: Duration::from_secs(300),
        })
    }

    /// Client for the service described by `config`, using its poll interval
    pub fn from_config(config: &Config) -> ServiceResult<Self> {
        let host = match config.service.http.bind.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            host => host,
        };
        let client = Self::new(format!("http://{}:{}", host, config.service.http.port))?;
        Ok(client
            .with_poll_interval(Duration::from_millis(config.defaults.poll_interval_ms))
            .with_poll_timeout(Duration::from_secs(config.defaults.poll_timeout_secs)))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ServiceResult<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ServiceError::Upstream(format!("Malformed response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_string))
            .unwrap_or(body);

        Err(match status.as_u16() {
            400 => ServiceError::Validation(message),
            403 => ServiceError::Forbidden(message),
            404 => ServiceError::NotFound(message),
            503 => ServiceError::Unavailable(message),
            504 => ServiceError::Timeout(message),
            _ => ServiceError::Upstream(format!("{}: {}", status, message)),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ServiceResult<T> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(connect_error)?;
        Self::decode(response).await
    }

    pub async fn health(&self) -> ServiceResult<HealthReport> {
        self.get("/health").await
    }

    pub async fn create_task(&self, request: &TaskRequest) -> ServiceResult<String> {
        let response = self
            .http
            .post(self.url("/transcript/task"))
            .json(request)
            .send()
            .await
            .map_err(connect_error)?;
        let created: TaskCreated = Self::decode(response).await?;
        Ok(created.task_id)
    }

    pub async fn task_status(&self, task_id: &str) -> ServiceResult<TaskStatus> {
        self.get(&format!("/transcript/task/{}", task_id)).await
    }

    /// Poll until the task reaches a terminal state or `timeout` elapses
    pub async fn poll_task(&self, task_id: &str, timeout: Duration) -> ServiceResult<TaskStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.task_status(task_id).await?;
            if status.status.is_terminal() {
                return Ok(status);
            }
            if Instant::now() + self.poll_interval > deadline {
                return Err(ServiceError::Timeout(format!(
                    "Task {} did not finish within {:?}",
                    task_id, timeout
                )));
            }
            debug!("Task {} still running", task_id);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// [`TranscriptClient::poll_task`] with the configured deadline
    pub async fn wait_for_task(&self, task_id: &str) -> ServiceResult<TaskStatus> {
        self.poll_task(task_id, self.poll_timeout).await
    }

    /// Events of a streaming task, ending with [`StreamEvent::End`]
    pub async fn stream_task(
        &self,
        task_id: &str,
    ) -> ServiceResult<impl Stream<Item = ServiceResult<StreamEvent>>> {
        let response = self
            .http
            .get(self.url(&format!("/transcript/task/{}/stream", task_id)))
            .send()
            .await
            .map_err(connect_error)?;

        if !response.status().is_success() {
            return Err(Self::decode::<serde_json::Value>(response)
                .await
                .err()
                .unwrap_or_else(|| ServiceError::Upstream("Unexpected stream response".into())));
        }

        let events = response.bytes_stream().eventsource().map(|event| {
            let event =
                event.map_err(|e| ServiceError::Upstream(format!("Broken event stream: {}", e)))?;
            serde_json::from_str::<StreamEvent>(&event.data)
                .map_err(|e| ServiceError::Upstream(format!("Malformed stream event: {}", e)))
        });
        Ok(events)
    }

    pub async fn upload(
        &self,
        audio: Vec<u8>,
        filename: &str,
        user_uuid: &str,
    ) -> ServiceResult<UploadResponse> {
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio).file_name(filename.to_string()),
            )
            .text("user_uuid", user_uuid.to_string());

        let response = self
            .http
            .post(self.url("/conversations/upload"))
            .multipart(form)
            .send()
            .await
            .map_err(connect_error)?;
        Self::decode(response).await
    }

    pub async fn processing_status(&self, file_hash: &str) -> ServiceResult<ProcessingStatus> {
        self.get(&format!("/conversations/processing/{}", file_hash))
            .await
    }

    /// Poll ingestion until it completes or fails, or `timeout` elapses
    pub async fn wait_for_processing(
        &self,
        file_hash: &str,
        timeout: Duration,
    ) -> ServiceResult<ProcessingStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.processing_status(file_hash).await?;
            if matches!(
                status.status,
                ProcessingState::Completed | ProcessingState::Failed
            ) {
                return Ok(status);
            }
            if Instant::now() + self.poll_interval > deadline {
                return Err(ServiceError::Timeout(format!(
                    "Processing of {} did not finish within {:?}",
                    file_hash, timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn list_conversations(
        &self,
        user_uuid: &str,
        limit: i64,
    ) -> ServiceResult<ConversationList> {
        let response = self
            .http
            .get(self.url("/conversations/list"))
            .query(&[("user_uuid", user_uuid.to_string()), ("limit", limit.to_string())])
            .send()
            .await
            .map_err(connect_error)?;
        Self::decode(response).await
    }

    pub async fn list_messages(
        &self,
        conversation_uuid: &str,
        limit: i64,
    ) -> ServiceResult<MessageList> {
        self.get(&format!(
            "/conversations/{}/messages?limit={}",
            conversation_uuid, limit
        ))
        .await
    }

    pub async fn suggestions(&self, conversation_uuid: &str) -> ServiceResult<SuggestionList> {
        self.get(&format!("/conversations/{}/suggestions", conversation_uuid))
            .await
    }
}

fn connect_error(err: reqwest::Error) -> ServiceError {
    ServiceError::Upstream(format!("Service unreachable: {}", err))
}
