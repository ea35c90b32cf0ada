use crate::retry::RetryPolicy;
use agentos_core::{AgentosError, AgentosResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Timeout for a single tool call or memory operation.
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    /// Finished tasks kept by the monitor.
    #[serde(default = "default_archive_capacity")]
    pub archive_capacity: usize,
    /// Event ids remembered to drop redelivered cancel requests.
    #[serde(default = "default_dedupe_window")]
    pub dedupe_window: usize,
    /// Per-step retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_step_timeout_ms() -> u64 {
    30_000
}
fn default_archive_capacity() -> usize {
    1_000
}
fn default_dedupe_window() -> usize {
    4_096
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: default_step_timeout_ms(),
            archive_capacity: default_archive_capacity(),
            dedupe_window: default_dedupe_window(),
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Step timeout as a `Duration`.
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    /// Reject a zero step timeout or an invalid retry policy.
    pub fn validate(&self) -> AgentosResult<()> {
        if self.step_timeout_ms == 0 {
            return Err(AgentosError::Config(
                "orchestrator.step_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.retry.validate()
    }
}
