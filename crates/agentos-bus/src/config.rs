use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the [`MessageBus`](crate::MessageBus).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Message bus endpoint, e.g. `memory://agentos`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Upper bound on how long `publish` may wait to enqueue an event.
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    /// Per-subscriber delivery buffer.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_endpoint() -> String {
    "memory://agentos".to_string()
}
fn default_publish_timeout_ms() -> u64 {
    1_000
}
fn default_subscriber_buffer() -> usize {
    256
}

impl BusConfig {
    /// Enqueue deadline as a `Duration`.
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            publish_timeout_ms: default_publish_timeout_ms(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}
