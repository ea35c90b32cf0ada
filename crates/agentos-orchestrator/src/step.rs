use agentos_bus::MessageBus;
use agentos_core::{
    AgentosError, AgentosResult, MemoryStore, Step, Task, ToolCallRequest,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Executes a single step of a task.
///
/// Tool calls go through the communication layer's request/reply path;
/// memory operations go to the memory store. Both are bounded by the same
/// per-step timeout.
pub struct StepExecutor {
    bus: Arc<MessageBus>,
    memory: Arc<dyn MemoryStore>,
    step_timeout: Duration,
}

impl StepExecutor {
    /// Executor calling tools over `bus` and memory in `memory`.
    pub fn new(bus: Arc<MessageBus>, memory: Arc<dyn MemoryStore>, step_timeout: Duration) -> Self {
        Self {
            bus,
            memory,
            step_timeout,
        }
    }

    /// Timeout applied to every step.
    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Run step `index` of `task` once and return its output.
    pub async fn execute(&self, task: &Task, index: usize) -> AgentosResult<serde_json::Value> {
        let step = task.steps.get(index).ok_or_else(|| {
            AgentosError::NotFound(format!("Task {} has no step {index}", task.id))
        })?;

        match step {
            Step::ToolCall { tool, arguments } => {
                let request = ToolCallRequest {
                    task_id: task.id,
                    tool: tool.clone(),
                    arguments: arguments.clone(),
                };
                let result = self.bus.call(request, self.step_timeout).await?;
                Ok(result.output)
            }
            Step::MemoryRead { key } => {
                let value = self
                    .bounded(step, self.memory.read(&task.agent_id, key))
                    .await?;
                if value.is_none() {
                    debug!(task_id = %task.id, key = %key, "Memory key not found");
                }
                Ok(value.unwrap_or(serde_json::Value::Null))
            }
            Step::MemoryWrite { key, value } => {
                self.bounded(step, self.memory.write(&task.agent_id, key, value.clone()))
                    .await?;
                Ok(serde_json::json!({ "key": key, "written": true }))
            }
        }
    }

    /// Apply the step timeout to a memory operation. Store errors that are
    /// not already step-level become `Execution` so the retry policy covers
    /// them.
    async fn bounded<T, F>(&self, step: &Step, op: F) -> AgentosResult<T>
    where
        F: Future<Output = AgentosResult<T>>,
    {
        match tokio::time::timeout(self.step_timeout, op).await {
            Err(_) => Err(AgentosError::Timeout(format!(
                "{} did not finish within {} ms",
                step.describe(),
                self.step_timeout.as_millis()
            ))),
            Ok(Err(e)) if e.is_retryable() => Err(e),
            Ok(Err(e)) => Err(AgentosError::Execution(format!("{}: {e}", step.describe()))),
            Ok(Ok(value)) => Ok(value),
        }
    }
}
