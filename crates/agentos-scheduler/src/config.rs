use serde::{Deserialize, Serialize};

/// Configuration for the [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of execution slots (concurrency limit).
    #[serde(default = "default_slots")]
    pub slots: usize,
    /// Pending-queue bound; submissions beyond it are rejected.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_slots() -> usize {
    4
}
fn default_max_pending() -> usize {
    1_024
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slots: default_slots(),
            max_pending: default_max_pending(),
        }
    }
}
