use agentos_core::{AgentosError, AgentosResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff for failed steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per step, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    100
}
fn default_backoff_max_ms() -> u64 {
    5_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63);
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(exp))
            .min(self.backoff_max_ms);
        Duration::from_millis(delay)
    }

    /// Whether another attempt is allowed after `attempt` attempts failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Reject zero attempts or a base above the cap.
    pub fn validate(&self) -> AgentosResult<()> {
        if self.max_attempts == 0 {
            return Err(AgentosError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(AgentosError::Config(format!(
                "retry.backoff_base_ms ({}) exceeds retry.backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        Ok(())
    }
}
