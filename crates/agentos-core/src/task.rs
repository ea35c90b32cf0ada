use crate::error::{AgentosError, AgentosResult};
use crate::state::{RunPhase, TaskState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = AgentosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(TaskId)
            .map_err(|e| AgentosError::Validation(format!("Invalid task id '{s}': {e}")))
    }
}

/// Identifier of the agent that owns a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    /// Wrap an agent identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One planned operation within a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// Invoke an external tool through the communication layer.
    ToolCall {
        /// Registered tool name.
        tool: String,
        /// Arguments passed to the tool as-is.
        #[serde(default)]
        arguments: serde_json::Value,
    },
    /// Read a value from the agent's memory.
    MemoryRead {
        /// Memory key.
        key: String,
    },
    /// Write a value to the agent's memory.
    MemoryWrite {
        /// Memory key.
        key: String,
        /// Value to store.
        value: serde_json::Value,
    },
}

impl Step {
    /// Tool-call step.
    pub fn tool(tool: impl Into<String>, arguments: serde_json::Value) -> Self {
        Step::ToolCall {
            tool: tool.into(),
            arguments,
        }
    }

    /// Memory read step.
    pub fn memory_read(key: impl Into<String>) -> Self {
        Step::MemoryRead { key: key.into() }
    }

    /// Memory write step.
    pub fn memory_write(key: impl Into<String>, value: serde_json::Value) -> Self {
        Step::MemoryWrite {
            key: key.into(),
            value,
        }
    }

    /// Short description used in logs.
    pub fn describe(&self) -> String {
        match self {
            Step::ToolCall { tool, .. } => format!("tool:{tool}"),
            Step::MemoryRead { key } => format!("memory.read:{key}"),
            Step::MemoryWrite { key, .. } => format!("memory.write:{key}"),
        }
    }

    fn validate(&self, index: usize) -> AgentosResult<()> {
        let empty = match self {
            Step::ToolCall { tool, .. } => tool.trim().is_empty(),
            Step::MemoryRead { key } | Step::MemoryWrite { key, .. } => key.trim().is_empty(),
        };
        if empty {
            return Err(AgentosError::Validation(format!(
                "Step {index} ({}) has an empty target",
                self.describe()
            )));
        }
        Ok(())
    }
}

/// Inbound task submission, as received from the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Caller-chosen id; a fresh one is generated when absent.
    #[serde(default)]
    pub id: Option<TaskId>,
    /// Agent that owns the task.
    pub agent_id: AgentId,
    /// Planned steps, executed in order.
    pub steps: Vec<Step>,
    /// Higher runs sooner. Defaults to 0.
    #[serde(default)]
    pub priority: i32,
}

impl TaskSubmission {
    /// Build a queued task, generating an id if none was given.
    pub fn into_task(self) -> Task {
        let mut task = Task::new(self.agent_id, self.steps).with_priority(self.priority);
        if let Some(id) = self.id {
            task.id = id;
        }
        task
    }
}

/// One agent execution request.
///
/// Created on submission, mutated only by the component that currently owns
/// it (scheduler while queued, orchestrator while running).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: TaskId,
    /// Agent that owns the task.
    pub agent_id: AgentId,
    /// Planned steps, executed in order.
    pub steps: Vec<Step>,
    /// Higher runs sooner.
    pub priority: i32,
    /// When the task was created.
    pub submitted_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Number of step re-attempts made so far, across all steps.
    pub retry_count: u32,
    /// Most recent step error, cleared when the step later succeeds.
    pub last_error: Option<String>,
    /// When the task reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// New queued task with priority 0 and a fresh id.
    pub fn new(agent_id: AgentId, steps: Vec<Step>) -> Self {
        Self {
            id: TaskId::new(),
            agent_id,
            steps,
            priority: 0,
            submitted_at: Utc::now(),
            state: TaskState::Queued,
            retry_count: 0,
            last_error: None,
            finished_at: None,
        }
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Use a caller-chosen id.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Reject submissions that cannot be scheduled.
    pub fn validate(&self) -> AgentosResult<()> {
        if self.steps.is_empty() {
            return Err(AgentosError::Validation(format!(
                "Task {} has no steps",
                self.id
            )));
        }
        if self.agent_id.as_str().trim().is_empty() {
            return Err(AgentosError::Validation(format!(
                "Task {} has an empty agent id",
                self.id
            )));
        }
        if self.state != TaskState::Queued {
            return Err(AgentosError::Validation(format!(
                "Task {} must be submitted in the queued state, found {}",
                self.id, self.state
            )));
        }
        for (index, step) in self.steps.iter().enumerate() {
            step.validate(index)?;
        }
        Ok(())
    }

    /// Queued → Running. Called by the scheduler when it grants a slot.
    pub fn mark_running(&mut self) -> AgentosResult<()> {
        self.state.transition(TaskState::Running {
            phase: RunPhase::Planning,
        })
    }

    /// Running(planning) → Queued, for a grant that was handed back unstarted.
    pub fn return_to_queue(&mut self) -> AgentosResult<()> {
        self.state.transition(TaskState::Queued)
    }

    /// Enter step `index`; steps must be entered in order.
    pub fn begin_step(&mut self, index: usize) -> AgentosResult<()> {
        self.state.transition(TaskState::Running {
            phase: RunPhase::Executing { step: index },
        })
    }

    /// All steps done; move to the finalizing phase.
    pub fn finalize(&mut self) -> AgentosResult<()> {
        self.state.transition(TaskState::Running {
            phase: RunPhase::Finalizing,
        })
    }

    /// Finalizing → Completed.
    pub fn complete(&mut self) -> AgentosResult<()> {
        self.state.transition(TaskState::Completed)?;
        self.last_error = None;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Running → Failed, recording `error` as the last error.
    pub fn fail(&mut self, error: impl Into<String>) -> AgentosResult<()> {
        let error = error.into();
        self.state.transition(TaskState::Failed {
            error: error.clone(),
        })?;
        self.last_error = Some(error);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Queued or Running → Cancelled.
    pub fn cancel(&mut self) -> AgentosResult<()> {
        self.state.transition(TaskState::Cancelled)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Index of the step currently executing, if any.
    pub fn current_step(&self) -> Option<usize> {
        match self.state {
            TaskState::Running {
                phase: RunPhase::Executing { step },
            } => Some(step),
            _ => None,
        }
    }
}
