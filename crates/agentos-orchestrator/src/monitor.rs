use agentos_core::{AgentId, Task, TaskId};
use agentos_scheduler::SlotId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Aggregate counters for everything the orchestrator has driven.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetrics {
    /// Tasks that received a slot.
    pub started: u64,
    /// Tasks that completed.
    pub completed: u64,
    /// Tasks that failed.
    pub failed: u64,
    /// Tasks cancelled while running.
    pub cancelled: u64,
    /// Steps that succeeded.
    pub steps_executed: u64,
    /// Step re-attempts.
    pub retries: u64,
    /// Summed wall time of finished tasks.
    pub total_duration_ms: u64,
}

/// A task currently held by a driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTask {
    /// Task id.
    pub task_id: TaskId,
    /// Owning agent.
    pub agent_id: AgentId,
    /// Slot the task holds.
    pub slot_id: SlotId,
    /// Index of the step being executed, once one has started.
    pub step: Option<usize>,
    /// When the driver started.
    pub started_at: DateTime<Utc>,
}

/// Snapshot of a task that reached a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task id.
    pub task_id: TaskId,
    /// Owning agent.
    pub agent_id: AgentId,
    /// `completed`, `failed` or `cancelled`.
    pub state: String,
    /// Last error, if any.
    pub error: Option<String>,
    /// Step re-attempts made.
    pub retry_count: u32,
    /// Number of planned steps.
    pub steps: usize,
    /// Wall time from grant to terminal state.
    pub duration_ms: u64,
    /// When the task reached its terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    fn from_task(task: &Task, duration_ms: u64) -> Self {
        Self {
            task_id: task.id,
            agent_id: task.agent_id.clone(),
            state: task.state.label().to_string(),
            error: task.last_error.clone(),
            retry_count: task.retry_count,
            steps: task.steps.len(),
            duration_ms,
            finished_at: task.finished_at,
        }
    }
}

/// Tracks running tasks, counters, and a bounded archive of finished tasks.
pub struct EngineMonitor {
    metrics: Arc<RwLock<EngineMetrics>>,
    active: Arc<RwLock<HashMap<TaskId, ActiveTask>>>,
    archive: Arc<RwLock<VecDeque<TaskRecord>>>,
    archive_capacity: usize,
}

impl EngineMonitor {
    /// Monitor keeping the last `archive_capacity` finished tasks.
    pub fn new(archive_capacity: usize) -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            active: Arc::new(RwLock::new(HashMap::new())),
            archive: Arc::new(RwLock::new(VecDeque::new())),
            archive_capacity: archive_capacity.max(1),
        }
    }

    /// Mark a task as picked up by a driver.
    pub async fn start_task(&self, task: &Task, slot_id: SlotId) {
        self.active.write().await.insert(
            task.id,
            ActiveTask {
                task_id: task.id,
                agent_id: task.agent_id.clone(),
                slot_id,
                step: None,
                started_at: Utc::now(),
            },
        );
        self.metrics.write().await.started += 1;
    }

    /// Note that `task_id` began step `index`.
    pub async fn enter_step(&self, task_id: TaskId, index: usize) {
        if let Some(active) = self.active.write().await.get_mut(&task_id) {
            active.step = Some(index);
        }
    }

    /// Count a successful step.
    pub async fn record_step(&self) {
        self.metrics.write().await.steps_executed += 1;
    }

    /// Count a step re-attempt.
    pub async fn record_retry(&self) {
        self.metrics.write().await.retries += 1;
    }

    /// Move a finished task from the active set into the archive.
    pub async fn finish_task(&self, task: &Task, duration_ms: u64) {
        self.active.write().await.remove(&task.id);
        {
            let mut metrics = self.metrics.write().await;
            match task.state.label() {
                "completed" => metrics.completed += 1,
                "failed" => metrics.failed += 1,
                "cancelled" => metrics.cancelled += 1,
                _ => {}
            }
            metrics.total_duration_ms += duration_ms;
        }
        let mut archive = self.archive.write().await;
        archive.push_back(TaskRecord::from_task(task, duration_ms));
        while archive.len() > self.archive_capacity {
            archive.pop_front();
        }
    }

    /// Copy of the counters.
    pub async fn metrics(&self) -> EngineMetrics {
        self.metrics.read().await.clone()
    }

    /// Tasks currently held by a driver.
    pub async fn active(&self) -> Vec<ActiveTask> {
        let active = self.active.read().await;
        active.values().cloned().collect()
    }

    /// Most recent archived record for a task, if still retained.
    pub async fn record(&self, task_id: TaskId) -> Option<TaskRecord> {
        let archive = self.archive.read().await;
        archive.iter().rev().find(|r| r.task_id == task_id).cloned()
    }

    /// Up to `limit` archived records, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<TaskRecord> {
        let archive = self.archive.read().await;
        archive.iter().rev().take(limit).cloned().collect()
    }

    /// Serialize the current state as JSON (for status endpoints).
    pub async fn to_json(&self) -> serde_json::Value {
        let metrics = self.metrics().await;
        let active = self.active().await;
        let recent = self.recent(20).await;
        serde_json::json!({
            "metrics": metrics,
            "active": active,
            "recent": recent,
        })
    }
}

impl Default for EngineMonitor {
    fn default() -> Self {
        Self::new(1_000)
    }
}
