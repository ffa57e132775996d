use tokio::sync::{broadcast, mpsc};
use tracing::info;
use uuid::Uuid;

use crate::error::PoolError;
use crate::events::AgentEvent;
use crate::types::PoolTask;

/// Front door for new tasks. Its receiver is attached to the worker pool as
/// one of the merged sources.
#[derive(Clone)]
pub struct TaskProvider {
    sender: mpsc::Sender<PoolTask>,
    events: Option<broadcast::Sender<AgentEvent>>,
}

impl TaskProvider {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PoolTask>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                events: None,
            },
            receiver,
        )
    }

    pub fn with_events(mut self, events: broadcast::Sender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Queue `text` under a fresh id and return the id. Waits while the
    /// channel is full; fails once the consuming side has shut down.
    pub async fn submit(&self, text: impl Into<String>) -> Result<String, PoolError> {
        let task = PoolTask::new(Uuid::new_v4().to_string(), text);
        let id = task.id.clone();
        let text = task.text.clone();

        self.sender
            .send(task)
            .await
            .map_err(|_| PoolError::PoolClosed)?;

        info!(task_id = %id, text = %text, "task created");
        if let Some(events) = &self.events {
            let _ = events.send(AgentEvent::TaskQueued {
                task_id: id.clone(),
                text,
            });
        }
        Ok(id)
    }
}
