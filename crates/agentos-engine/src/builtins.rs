use agentos_bus::MessageBus;
use agentos_core::{AgentosResult, ToolCallRequest, ToolCallResult, ToolProvider};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Longest wait the `sleep` tool accepts.
const MAX_SLEEP_MS: u64 = 60_000;

/// Returns its arguments unchanged.
pub struct EchoTool;

#[async_trait]
impl ToolProvider for EchoTool {
    async fn invoke(&self, request: ToolCallRequest) -> AgentosResult<ToolCallResult> {
        Ok(ToolCallResult::success(request.task_id, request.arguments))
    }
}

/// Waits `ms` milliseconds, then reports how long it slept.
pub struct SleepTool;

#[async_trait]
impl ToolProvider for SleepTool {
    async fn invoke(&self, request: ToolCallRequest) -> AgentosResult<ToolCallResult> {
        let Some(ms) = request.arguments["ms"].as_u64() else {
            return Ok(ToolCallResult::failure(
                request.task_id,
                "sleep requires a non-negative integer 'ms' argument",
            ));
        };
        if ms > MAX_SLEEP_MS {
            return Ok(ToolCallResult::failure(
                request.task_id,
                format!("sleep of {ms} ms exceeds the {MAX_SLEEP_MS} ms limit"),
            ));
        }
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ToolCallResult::success(
            request.task_id,
            serde_json::json!({ "slept_ms": ms }),
        ))
    }
}

/// Register the built-in tools on `bus`.
pub fn register_builtins(bus: &MessageBus) {
    bus.register_tool("echo", Arc::new(EchoTool));
    bus.register_tool("sleep", Arc::new(SleepTool));
}
