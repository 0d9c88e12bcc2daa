//! Per-task event queues bridging a running agent to an SSE reader
//!
//! A queue is opened when a streaming task is submitted. The task owns the
//! [`StreamProducer`]; the receiving half waits in the bus until a client
//! attaches. End of stream is the channel closing, which only happens after
//! the producer has emitted exactly one terminal event (`done` or `error`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Wire events, serialized as `{"type": "<kind>", ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Incremental text plus everything produced so far
    Delta { delta: String, accumulated: String },
    /// Non-text run event such as a tool invocation
    Event { event_type: String, data: String },
    Done { text: String, conversation_id: String },
    Error { error: String },
    /// Synthesized by the consumer once the queue is closed
    End,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

/// Writing half, owned by the task that produces the answer
pub struct StreamProducer {
    task_id: String,
    tx: Option<mpsc::UnboundedSender<StreamEvent>>,
}

impl StreamProducer {
    /// Push a non-terminal event. Never blocks; a missing reader is not an error.
    pub fn send(&self, event: StreamEvent) {
        debug_assert!(!event.is_terminal() && event != StreamEvent::End);
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Stream reader for task {} is gone", self.task_id);
            }
        }
    }

    pub fn delta(&self, delta: impl Into<String>, accumulated: impl Into<String>) {
        self.send(StreamEvent::Delta {
            delta: delta.into(),
            accumulated: accumulated.into(),
        });
    }

    pub fn event(&self, event_type: impl Into<String>, data: impl Into<String>) {
        self.send(StreamEvent::Event {
            event_type: event_type.into(),
            data: data.into(),
        });
    }

    /// Emit the final answer and close the stream
    pub fn done(mut self, text: impl Into<String>, conversation_id: impl Into<String>) {
        self.finish(StreamEvent::Done {
            text: text.into(),
            conversation_id: conversation_id.into(),
        });
    }

    /// Emit a failure and close the stream
    pub fn error(mut self, error: impl Into<String>) {
        self.finish(StreamEvent::Error {
            error: error.into(),
        });
    }

    fn finish(&mut self, terminal: StreamEvent) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(terminal);
            // dropping `tx` closes the channel
        }
    }
}

impl Drop for StreamProducer {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!("Stream for task {} dropped without a result", self.task_id);
            self.finish(StreamEvent::Error {
                error: "Stream closed without a result".to_string(),
            });
        }
    }
}

/// Reading half. Yields the produced events, then one `End`, then `None`.
#[derive(Debug)]
pub struct StreamConsumer {
    task_id: String,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    ended: bool,
}

impl StreamConsumer {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.ended {
            return None;
        }
        match self.rx.recv().await {
            Some(event) => Some(event),
            None => {
                self.ended = true;
                Some(StreamEvent::End)
            }
        }
    }
}

/// Queues of streaming tasks whose reader has not attached yet
#[derive(Default)]
pub struct StreamBus {
    pending: Mutex<HashMap<String, StreamConsumer>>,
}

impl StreamBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the queue for `task_id`
    pub async fn open(&self, task_id: &str) -> StreamProducer {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().await.insert(
            task_id.to_string(),
            StreamConsumer {
                task_id: task_id.to_string(),
                rx,
                ended: false,
            },
        );

        StreamProducer {
            task_id: task_id.to_string(),
            tx: Some(tx),
        }
    }

    /// Hand the queue to a reader. Each queue can be attached once.
    pub async fn attach(&self, task_id: &str) -> Option<StreamConsumer> {
        self.pending.lock().await.remove(task_id)
    }

    /// Drop a queue nobody attached to
    pub async fn release(&self, task_id: &str) {
        if self.pending.lock().await.remove(task_id).is_some() {
            debug!("Released unread stream for task {}", task_id);
        }
    }

    pub async fn clear(&self) {
        self.pending.lock().await.clear();
    }
}
