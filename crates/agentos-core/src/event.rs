use crate::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named topic an [`Event`] is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// A task was accepted into the pending queue.
    #[serde(rename = "task.submitted")]
    TaskSubmitted,
    /// A task was granted a slot and its steps began.
    #[serde(rename = "task.started")]
    TaskStarted,
    /// A step finished; carries its index and output.
    #[serde(rename = "task.progress")]
    TaskProgress,
    /// Every step of a task succeeded.
    #[serde(rename = "task.completed")]
    TaskCompleted,
    /// A step exhausted its retry budget.
    #[serde(rename = "task.failed")]
    TaskFailed,
    /// A task was cancelled while queued or running.
    #[serde(rename = "task.cancelled")]
    TaskCancelled,
    /// Scheduler → orchestrator request to cancel a running task.
    #[serde(rename = "task.cancel_requested")]
    CancelRequested,
}

impl Topic {
    /// Every topic the engine publishes on.
    pub const ALL: [Topic; 7] = [
        Topic::TaskSubmitted,
        Topic::TaskStarted,
        Topic::TaskProgress,
        Topic::TaskCompleted,
        Topic::TaskFailed,
        Topic::TaskCancelled,
        Topic::CancelRequested,
    ];

    /// Wire name of the topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::TaskSubmitted => "task.submitted",
            Topic::TaskStarted => "task.started",
            Topic::TaskProgress => "task.progress",
            Topic::TaskCompleted => "task.completed",
            Topic::TaskFailed => "task.failed",
            Topic::TaskCancelled => "task.cancelled",
            Topic::CancelRequested => "task.cancel_requested",
        }
    }

    /// Topics that mark the end of a task's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Topic::TaskCompleted | Topic::TaskFailed | Topic::TaskCancelled
        )
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable message describing a state change.
///
/// Delivery is at-least-once; consumers dedupe on [`Event::id`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique per event; redeliveries keep it.
    pub id: Uuid,
    /// Topic the event is published on.
    pub topic: Topic,
    /// Task the event is about.
    pub task_id: TaskId,
    /// Topic-specific data.
    pub data: serde_json::Value,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// New event with a fresh id, stamped now.
    pub fn new(topic: Topic, task_id: TaskId, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            task_id,
            data,
            timestamp: Utc::now(),
        }
    }
}
