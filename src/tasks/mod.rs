//! In-memory table of asynchronous question tasks
//!
//! A task is recorded as STARTED the moment it is submitted and its job runs
//! on a detached tokio task. Exactly one terminal transition (SUCCESS or
//! FAILED) is applied per task; nothing is retried.

use crate::error::{ServiceError, ServiceResult};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Started,
    Success,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Started)
    }
}

/// Payload of a successful task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub text: String,
    pub conversation_id: String,
}

/// Pollable view of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl TaskStatus {
    fn started() -> Self {
        Self {
            status: TaskState::Started,
            result: None,
            failure: None,
        }
    }
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskStatus>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `task_id` as STARTED and run `job` in the background.
    ///
    /// The caller allocates the id so per-task resources exist before the job
    /// starts. `Ok` becomes SUCCESS; `Err` or a panic becomes FAILED.
    pub async fn submit<Fut>(self: &Arc<Self>, task_id: String, job: Fut)
    where
        Fut: Future<Output = Result<TaskResult>> + Send + 'static,
    {
        self.tasks
            .write()
            .await
            .insert(task_id.clone(), TaskStatus::started());

        let work = tokio::spawn(job);
        let registry = Arc::clone(self);
        let id = task_id.clone();

        tokio::spawn(async move {
            match work.await {
                Ok(Ok(result)) => {
                    registry.complete(&id, result).await;
                }
                Ok(Err(e)) => {
                    registry.fail(&id, format!("{:#}", e)).await;
                }
                Err(join_err) => {
                    error!("Task {} panicked: {}", id, join_err);
                    registry.fail(&id, format!("Task panicked: {}", join_err)).await;
                }
            }
        });

        info!("Submitted task {}", task_id);
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.read().await.get(task_id).cloned()
    }

    pub async fn status(&self, task_id: &str) -> ServiceResult<TaskStatus> {
        self.get(task_id)
            .await
            .ok_or_else(|| ServiceError::NotFound("Task not found".to_string()))
    }

    /// STARTED -> SUCCESS. Returns false if the task is unknown or already terminal.
    pub async fn complete(&self, task_id: &str, result: TaskResult) -> bool {
        self.transition(
            task_id,
            TaskStatus {
                status: TaskState::Success,
                result: Some(result),
                failure: None,
            },
        )
        .await
    }

    /// STARTED -> FAILED. Returns false if the task is unknown or already terminal.
    pub async fn fail(&self, task_id: &str, failure: impl Into<String>) -> bool {
        self.transition(
            task_id,
            TaskStatus {
                status: TaskState::Failed,
                result: None,
                failure: Some(failure.into()),
            },
        )
        .await
    }

    async fn transition(&self, task_id: &str, next: TaskStatus) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(task_id) {
            Some(current) if current.status == TaskState::Started => {
                info!("Task {} -> {:?}", task_id, next.status);
                *current = next;
                true
            }
            Some(current) => {
                warn!(
                    "Ignoring {:?} for task {} already {:?}",
                    next.status, task_id, current.status
                );
                false
            }
            None => {
                warn!("Ignoring {:?} for unknown task {}", next.status, task_id);
                false
            }
        }
    }

    /// Number of tasks still STARTED
    pub async fn active_count(&self) -> usize {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == TaskState::Started)
            .count()
    }

    pub async fn clear(&self) {
        self.tasks.write().await.clear();
    }
}
