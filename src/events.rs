use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::TaskOutcome;

pub const EVENT_BUFFER: usize = 64;

/// Progress notifications, fanned out to any number of listeners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    TaskQueued {
        task_id: String,
        text: String,
    },
    TaskStarted {
        task_id: String,
        worker: usize,
    },
    Thinking {
        task_id: String,
        step: usize,
    },
    Step {
        task_id: String,
        step: usize,
        description: String,
    },
    StepError {
        task_id: String,
        step: usize,
        message: String,
    },
    TaskFinished {
        task_id: String,
        steps: usize,
        outcome: TaskOutcome,
    },
}

impl AgentEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::TaskQueued { .. } => "task_queued",
            AgentEvent::TaskStarted { .. } => "task_started",
            AgentEvent::Thinking { .. } => "thinking",
            AgentEvent::Step { .. } => "step",
            AgentEvent::StepError { .. } => "step_error",
            AgentEvent::TaskFinished { .. } => "task_finished",
        }
    }
}

pub fn channel() -> broadcast::Sender<AgentEvent> {
    broadcast::channel(EVENT_BUFFER).0
}
