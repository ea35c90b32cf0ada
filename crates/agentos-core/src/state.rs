use crate::error::{AgentosError, AgentosResult};
use serde::{Deserialize, Serialize};

/// Internal sub-phase of a running task.
///
/// Not externally visible as a separate state, but it scopes retries: a
/// retry re-attempts the step named by `Executing { step }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    /// Slot granted, no step started yet.
    Planning,
    /// Executing the step at this zero-based index.
    Executing {
        /// Zero-based step index.
        step: usize,
    },
    /// All steps done, publishing the outcome.
    Finalizing,
}

/// Lifecycle state of a task.
///
/// `Queued → Running → {Completed | Failed | Cancelled}`. A task is in exactly
/// one of these at any time; transitions go through [`TaskState::transition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in the scheduler's pending queue.
    Queued,
    /// Holding a slot; `phase` tracks progress through the steps.
    Running { phase: RunPhase },
    /// Every step succeeded.
    Completed,
    /// A step exhausted its retry budget; `error` is the last error seen.
    Failed { error: String },
    /// Cancelled while queued or at a step boundary.
    Cancelled,
}

impl TaskState {
    /// Short lowercase name of the state, without sub-phase.
    pub fn label(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running { .. } => "running",
            TaskState::Completed => "completed",
            TaskState::Failed { .. } => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    /// Whether the task has reached Completed, Failed, or Cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed { .. } | TaskState::Cancelled
        )
    }

    /// Whether the task currently holds a slot.
    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Running { .. })
    }

    /// Whether moving from `self` to `next` is a legal lifecycle edge.
    pub fn can_transition_to(&self, next: &TaskState) -> bool {
        use RunPhase::{Executing, Finalizing, Planning};
        match (self, next) {
            (TaskState::Queued, TaskState::Running { phase: Planning }) => true,
            // A grant that was never started goes back to the queue.
            (TaskState::Running { phase: Planning }, TaskState::Queued) => true,
            (
                TaskState::Running { phase: Planning },
                TaskState::Running {
                    phase: Executing { step: 0 },
                },
            ) => true,
            (
                TaskState::Running {
                    phase: Executing { step: cur },
                },
                TaskState::Running {
                    phase: Executing { step: to },
                },
            ) => *to == cur + 1,
            (
                TaskState::Running {
                    phase: Planning | Executing { .. },
                },
                TaskState::Running { phase: Finalizing },
            ) => true,
            (TaskState::Running { phase: Finalizing }, TaskState::Completed) => true,
            (TaskState::Running { .. }, TaskState::Failed { .. }) => true,
            (TaskState::Queued | TaskState::Running { .. }, TaskState::Cancelled) => true,
            _ => false,
        }
    }

    /// Move to `next`, rejecting edges the lifecycle does not allow.
    pub fn transition(&mut self, next: TaskState) -> AgentosResult<()> {
        if !self.can_transition_to(&next) {
            return Err(AgentosError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Running {
                phase: RunPhase::Planning,
            } => write!(f, "running(planning)"),
            TaskState::Running {
                phase: RunPhase::Executing { step },
            } => write!(f, "running(step {step})"),
            TaskState::Running {
                phase: RunPhase::Finalizing,
            } => write!(f, "running(finalizing)"),
            other => write!(f, "{}", other.label()),
        }
    }
}
