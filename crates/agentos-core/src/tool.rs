use crate::error::AgentosResult;
use crate::task::TaskId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A request to invoke a named tool on behalf of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Task issuing the call.
    pub task_id: TaskId,
    /// Name of the tool to invoke.
    pub tool: String,
    /// Tool arguments.
    pub arguments: serde_json::Value,
}

/// The reply to a [`ToolCallRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Task the reply belongs to.
    pub task_id: TaskId,
    /// Whether the tool succeeded.
    pub success: bool,
    /// Tool output; `null` on failure.
    #[serde(default)]
    pub output: serde_json::Value,
    /// Failure reason when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolCallResult {
    /// Creates a successful tool result.
    pub fn success(task_id: TaskId, output: serde_json::Value) -> Self {
        Self {
            task_id,
            success: true,
            output,
            error: None,
        }
    }

    /// Creates a failed tool result.
    pub fn failure(task_id: TaskId, error: impl Into<String>) -> Self {
        Self {
            task_id,
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// An externally registered responder for tool calls.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Handle one request. A reply with `success == false` is a remote failure.
    async fn invoke(&self, request: ToolCallRequest) -> AgentosResult<ToolCallResult>;
}
