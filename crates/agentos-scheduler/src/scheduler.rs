use crate::config::SchedulerConfig;
use crate::queue::PendingQueue;
use crate::slots::{SlotId, SlotPool};
use agentos_bus::MessageBus;
use agentos_core::{AgentosError, AgentosResult, Component, Event, Task, TaskId, Topic};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Attempts for lifecycle events the scheduler owns.
const EVENT_PUBLISH_ATTEMPTS: u32 = 3;

/// A queued task bound to a free slot.
///
/// The task travels with the grant: from here on the orchestrator owns it.
#[derive(Debug)]
pub struct Grant {
    /// The task, already marked running.
    pub task: Task,
    /// Slot the task holds until it is released.
    pub slot_id: SlotId,
    seq: u64,
}

impl Grant {
    /// Id of the granted task.
    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    /// Submission sequence of the task. Unique per submission, so it tells
    /// a resubmitted id apart from the run that used it before.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Receiving side of the grant stream.
pub type GrantReceiver = mpsc::UnboundedReceiver<Grant>;

/// Result of [`Scheduler::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The task was queued and is now Cancelled.
    Cancelled,
    /// The task is running; a cancel request was forwarded to the orchestrator.
    Requested,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Total slots.
    pub capacity: usize,
    /// Slots without a task.
    pub free_slots: usize,
    /// Tasks holding a slot.
    pub running: usize,
    /// Tasks waiting in the queue.
    pub pending: usize,
    /// Whether submissions are accepted.
    pub accepting: bool,
}

struct SchedulerState {
    accepting: bool,
    /// Whether an orchestrator is consuming grants.
    attached: bool,
    queue: PendingQueue,
    slots: SlotPool,
    /// Running task ids with the sequence of the grant they hold.
    running: HashMap<TaskId, u64>,
    /// Submissions validated but not yet enqueued (their event is in flight).
    reserved: HashSet<TaskId>,
}

impl SchedulerState {
    fn is_tracked(&self, id: TaskId) -> bool {
        self.queue.contains(id) || self.running.contains_key(&id) || self.reserved.contains(&id)
    }
}

/// Owns the pending queue and the slot pool.
///
/// Every mutation of queue or slots happens while holding `state`; no await
/// point is ever reached with the lock held.
pub struct Scheduler {
    config: SchedulerConfig,
    bus: Arc<MessageBus>,
    state: Mutex<SchedulerState>,
    grant_tx: mpsc::UnboundedSender<Grant>,
    grant_rx: Mutex<Option<GrantReceiver>>,
}

impl Scheduler {
    /// Stopped scheduler publishing on `bus`.
    pub fn new(bus: Arc<MessageBus>, config: SchedulerConfig) -> Self {
        let (grant_tx, grant_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(SchedulerState {
                accepting: false,
                attached: false,
                queue: PendingQueue::new(),
                slots: SlotPool::new(config.slots),
                running: HashMap::new(),
                reserved: HashSet::new(),
            }),
            config,
            bus,
            grant_tx,
            grant_rx: Mutex::new(Some(grant_rx)),
        }
    }

    /// Configuration the scheduler was built with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Enqueue a task.
    ///
    /// Fails with `Validation` for a task without steps or whose id is already
    /// queued or running, and with `CapacityExceeded` once the pending queue
    /// holds `max_pending` tasks. The `task.submitted` event is published
    /// before the task becomes eligible for a slot.
    pub async fn submit(&self, task: Task) -> AgentosResult<TaskId> {
        task.validate()?;
        let id = task.id;

        {
            let mut state = self.state.lock();
            if !state.accepting {
                return Err(AgentosError::Lifecycle(
                    "Scheduler is not accepting submissions".to_string(),
                ));
            }
            if state.is_tracked(id) {
                return Err(AgentosError::Validation(format!(
                    "Task {id} is already tracked"
                )));
            }
            if state.queue.len() + state.reserved.len() >= self.config.max_pending {
                warn!(task_id = %id, max_pending = self.config.max_pending, "Submission rejected: queue full");
                return Err(AgentosError::CapacityExceeded(format!(
                    "Pending queue is full ({} tasks)",
                    self.config.max_pending
                )));
            }
            state.reserved.insert(id);
        }

        let submitted = Event::new(
            Topic::TaskSubmitted,
            id,
            serde_json::json!({
                "agent_id": task.agent_id,
                "priority": task.priority,
                "steps": task.steps.len(),
            }),
        );
        if let Err(e) = self.bus.publish(submitted).await {
            self.state.lock().reserved.remove(&id);
            return Err(e);
        }

        let rejected = {
            let mut state = self.state.lock();
            state.reserved.remove(&id);
            if state.accepting {
                state.queue.push(task);
                debug!(task_id = %id, pending = state.queue.len(), "Task queued");
                Self::assign_locked(&mut state, &self.grant_tx);
                None
            } else {
                Some(task)
            }
        };

        // Stopped while the submitted event was in flight: close it out.
        if let Some(mut task) = rejected {
            task.cancel()?;
            self.publish_cancelled(&task, "scheduler stopped").await;
        }

        info!(task_id = %id, "Task submitted");
        Ok(id)
    }

    /// Bind queued tasks to free slots while both exist.
    ///
    /// Returns the number of grants issued. This is the only path from
    /// queued to running.
    pub fn try_assign(&self) -> usize {
        let mut state = self.state.lock();
        Self::assign_locked(&mut state, &self.grant_tx)
    }

    fn assign_locked(state: &mut SchedulerState, grant_tx: &mpsc::UnboundedSender<Grant>) -> usize {
        let mut granted = 0;
        while state.attached && state.slots.free_count() > 0 {
            let Some((seq, mut task)) = state.queue.pop() else {
                break;
            };
            let Some(slot_id) = state.slots.acquire(task.id) else {
                state.queue.restore(seq, task);
                break;
            };
            if let Err(e) = task.mark_running() {
                // Only Queued tasks are ever pushed, so this task has no
                // lifecycle left to drive; free the slot and move on.
                error!(task_id = %task.id, state = %task.state, error = %e, "Queued task in unexpected state, dropped");
                if let Err(e) = state.slots.release(slot_id) {
                    error!(task_id = %task.id, slot_id = %slot_id, error = %e, "Slot release failed");
                }
                continue;
            }
            let task_id = task.id;
            state.running.insert(task_id, seq);

            if let Err(mpsc::error::SendError(grant)) = grant_tx.send(Grant { task, slot_id, seq }) {
                warn!(task_id = %task_id, "Grant stream closed; task returned to queue");
                Self::requeue_locked(state, grant);
                state.attached = false;
                break;
            }
            info!(task_id = %task_id, slot_id = %slot_id, "Slot granted");
            granted += 1;
        }
        granted
    }

    fn requeue_locked(state: &mut SchedulerState, grant: Grant) {
        let Grant {
            mut task,
            slot_id,
            seq,
        } = grant;
        state.running.remove(&task.id);
        if let Err(e) = state.slots.release(slot_id) {
            error!(task_id = %task.id, slot_id = %slot_id, error = %e, "Slot release failed");
        }
        match task.return_to_queue() {
            Ok(()) => {
                debug!(task_id = %task.id, "Unstarted grant returned to queue");
                state.queue.restore(seq, task);
            }
            Err(e) => error!(task_id = %task.id, error = %e, "Grant could not be requeued"),
        }
    }

    /// Free a slot and try to fill it. Called when a task reaches a terminal state.
    pub fn release(&self, slot_id: SlotId) -> AgentosResult<()> {
        let mut state = self.state.lock();
        let task_id = state.slots.release(slot_id)?;
        state.running.remove(&task_id);
        debug!(task_id = %task_id, slot_id = %slot_id, "Slot released");
        Self::assign_locked(&mut state, &self.grant_tx);
        Ok(())
    }

    /// Cancel a task.
    ///
    /// A queued task is removed and becomes Cancelled without ever holding a
    /// slot. For a running task a cancel request is forwarded to the
    /// orchestrator, which performs the transition.
    pub async fn cancel(&self, task_id: TaskId) -> AgentosResult<CancelOutcome> {
        let (queued, running) = {
            let mut state = self.state.lock();
            let queued = state.queue.remove(task_id);
            let running = queued.is_none() && state.running.contains_key(&task_id);
            (queued, running)
        };

        if let Some(mut task) = queued {
            task.cancel()?;
            info!(task_id = %task_id, "Queued task cancelled");
            self.publish_cancelled(&task, "cancelled while queued").await;
            return Ok(CancelOutcome::Cancelled);
        }

        if running {
            let request = Event::new(Topic::CancelRequested, task_id, serde_json::Value::Null);
            self.bus
                .publish_reliably(request, EVENT_PUBLISH_ATTEMPTS)
                .await?;
            info!(task_id = %task_id, "Cancel request forwarded");
            return Ok(CancelOutcome::Requested);
        }

        Err(AgentosError::NotFound(format!(
            "Task {task_id} is not queued or running"
        )))
    }

    async fn publish_cancelled(&self, task: &Task, reason: &str) {
        let event = Event::new(
            Topic::TaskCancelled,
            task.id,
            serde_json::json!({
                "reason": reason,
                "agent_id": task.agent_id,
                "error": task.last_error,
            }),
        );
        if let Err(e) = self.bus.publish_reliably(event, EVENT_PUBLISH_ATTEMPTS).await {
            error!(task_id = %task.id, error = %e, "Failed to publish task.cancelled");
        }
    }

    /// Hand out the grant stream to a consumer and start granting.
    pub fn attach(&self) -> AgentosResult<GrantReceiver> {
        let grants = self.grant_rx.lock().take().ok_or_else(|| {
            AgentosError::Lifecycle("Grant stream is already attached".to_string())
        })?;
        let mut state = self.state.lock();
        state.attached = true;
        let granted = Self::assign_locked(&mut state, &self.grant_tx);
        info!(granted, "Grant consumer attached");
        Ok(grants)
    }

    /// Stop granting and take the grant stream back.
    ///
    /// Grants still buffered in the stream were never started; their tasks
    /// return to the queue at their original position and their slots free.
    pub fn detach(&self, mut grants: GrantReceiver) {
        let mut state = self.state.lock();
        state.attached = false;
        let mut returned = 0;
        while let Ok(grant) = grants.try_recv() {
            Self::requeue_locked(&mut state, grant);
            returned += 1;
        }
        *self.grant_rx.lock() = Some(grants);
        info!(returned, "Grant consumer detached");
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> SchedulerStats {
        let state = self.state.lock();
        SchedulerStats {
            capacity: state.slots.capacity(),
            free_slots: state.slots.free_count(),
            running: state.running.len(),
            pending: state.queue.len(),
            accepting: state.accepting,
        }
    }

    /// `"queued"` or `"running"` for a tracked task.
    pub fn state_of(&self, task_id: TaskId) -> Option<&'static str> {
        let state = self.state.lock();
        if state.queue.contains(task_id) || state.reserved.contains(&task_id) {
            Some("queued")
        } else if state.running.contains_key(&task_id) {
            Some("running")
        } else {
            None
        }
    }

    /// Sequence of the grant a running task holds, see [`Grant::seq`].
    pub fn grant_seq(&self, task_id: TaskId) -> Option<u64> {
        self.state.lock().running.get(&task_id).copied()
    }

    /// Queued task ids in the order they will be granted.
    pub fn pending_ids(&self) -> Vec<TaskId> {
        self.state.lock().queue.ids()
    }
}

#[async_trait]
impl Component for Scheduler {
    fn name(&self) -> &str {
        "scheduler"
    }

    async fn start(&self) -> AgentosResult<()> {
        if !self.bus.is_running() {
            return Err(AgentosError::Lifecycle(
                "Communication layer must be started before the scheduler".to_string(),
            ));
        }
        let mut state = self.state.lock();
        if state.accepting {
            return Err(AgentosError::Lifecycle(
                "Scheduler already started".to_string(),
            ));
        }
        state.accepting = true;
        info!(
            slots = state.slots.capacity(),
            max_pending = self.config.max_pending,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop accepting submissions and cancel every queued task.
    async fn stop(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.accepting = false;
            state.queue.drain()
        };
        let count = drained.len();
        for mut task in drained {
            if let Err(e) = task.cancel() {
                error!(task_id = %task.id, error = %e, "Queued task could not be cancelled");
                continue;
            }
            self.publish_cancelled(&task, "scheduler stopped").await;
        }
        info!(cancelled = count, "Scheduler stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use agentos_bus::BusConfig;
    use agentos_core::{AgentId, Step, TaskState};

    async fn scheduler(slots: usize, max_pending: usize) -> Scheduler {
        let bus = Arc::new(MessageBus::new(BusConfig::default()));
        bus.start().await.unwrap();
        let scheduler = Scheduler::new(bus, SchedulerConfig { slots, max_pending });
        scheduler.start().await.unwrap();
        scheduler
    }

    fn task(priority: i32) -> Task {
        Task::new(AgentId::new("agent"), vec![Step::memory_read("k")]).with_priority(priority)
    }

    #[tokio::test]
    async fn test_start_requires_bus() {
        let bus = Arc::new(MessageBus::new(BusConfig::default()));
        let scheduler = Scheduler::new(bus, SchedulerConfig::default());
        assert!(matches!(
            scheduler.start().await.unwrap_err(),
            AgentosError::Lifecycle(_)
        ));
    }

    #[tokio::test]
    async fn test_submit_before_start_rejected() {
        let bus = Arc::new(MessageBus::new(BusConfig::default()));
        bus.start().await.unwrap();
        let scheduler = Scheduler::new(bus, SchedulerConfig::default());
        assert!(scheduler.submit(task(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_no_grant_without_consumer() {
        let scheduler = scheduler(2, 10).await;
        scheduler.submit(task(0)).await.unwrap();
        assert_eq!(scheduler.try_assign(), 0);
        assert_eq!(scheduler.stats().pending, 1);
    }

    #[tokio::test]
    async fn test_grant_marks_running() {
        let scheduler = scheduler(1, 10).await;
        let id = scheduler.submit(task(0)).await.unwrap();
        let mut grants = scheduler.attach().unwrap();
        let grant = grants.try_recv().unwrap();
        assert_eq!(grant.task_id(), id);
        assert_eq!(
            grant.task.state,
            TaskState::Running {
                phase: agentos_core::RunPhase::Planning
            }
        );
        assert_eq!(scheduler.state_of(id), Some("running"));
        let stats = scheduler.stats();
        assert_eq!(stats.running, 1);
        assert_eq!(stats.free_slots, 0);
    }

    #[tokio::test]
    async fn test_attach_twice_fails() {
        let scheduler = scheduler(1, 10).await;
        let _grants = scheduler.attach().unwrap();
        assert!(scheduler.attach().is_err());
    }

    #[tokio::test]
    async fn test_release_triggers_next_grant() {
        let scheduler = scheduler(1, 10).await;
        let mut grants = scheduler.attach().unwrap();
        scheduler.submit(task(0)).await.unwrap();
        let second = scheduler.submit(task(0)).await.unwrap();

        let first = grants.try_recv().unwrap();
        assert!(grants.try_recv().is_err());

        scheduler.release(first.slot_id).unwrap();
        assert_eq!(grants.try_recv().unwrap().task_id(), second);
    }

    #[tokio::test]
    async fn test_release_unassigned_slot() {
        let scheduler = scheduler(1, 10).await;
        assert!(matches!(
            scheduler.release(SlotId(0)),
            Err(AgentosError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_detach_returns_unstarted_grants() {
        let scheduler = scheduler(2, 10).await;
        let grants = scheduler.attach().unwrap();
        let a = scheduler.submit(task(0)).await.unwrap();
        let b = scheduler.submit(task(0)).await.unwrap();
        assert_eq!(scheduler.stats().running, 2);

        scheduler.detach(grants);
        let stats = scheduler.stats();
        assert_eq!(stats.running, 0);
        assert_eq!(stats.free_slots, 2);
        assert_eq!(scheduler.pending_ids(), vec![a, b]);

        // Re-attaching grants them again.
        let mut grants = scheduler.attach().unwrap();
        assert_eq!(grants.try_recv().unwrap().task_id(), a);
        assert_eq!(grants.try_recv().unwrap().task_id(), b);
    }

    #[tokio::test]
    async fn test_unrunnable_queued_task_frees_slot() {
        let scheduler = scheduler(1, 10).await;
        let mut stale = task(9);
        stale.cancel().unwrap();
        scheduler.state.lock().queue.push(stale);
        let next = scheduler.submit(task(0)).await.unwrap();

        let mut grants = scheduler.attach().unwrap();
        assert_eq!(grants.try_recv().unwrap().task_id(), next);
        assert_eq!(scheduler.stats().pending, 0);
        assert_eq!(scheduler.stats().running, 1);
    }

    #[tokio::test]
    async fn test_grant_seq_changes_on_resubmission() {
        let scheduler = scheduler(1, 10).await;
        let mut grants = scheduler.attach().unwrap();
        let first = task(0);
        let id = first.id;
        scheduler.submit(first).await.unwrap();
        let grant = grants.try_recv().unwrap();
        assert_eq!(scheduler.grant_seq(id), Some(grant.seq()));

        scheduler.release(grant.slot_id).unwrap();
        assert_eq!(scheduler.grant_seq(id), None);

        scheduler.submit(task(0).with_id(id)).await.unwrap();
        let again = grants.try_recv().unwrap();
        assert_ne!(again.seq(), grant.seq());
        assert_eq!(scheduler.grant_seq(id), Some(again.seq()));
    }

    #[tokio::test]
    async fn test_stop_cancels_queued() {
        let scheduler = scheduler(1, 10).await;
        scheduler.submit(task(0)).await.unwrap();
        scheduler.submit(task(0)).await.unwrap();
        scheduler.stop().await;
        let stats = scheduler.stats();
        assert_eq!(stats.pending, 0);
        assert!(!stats.accepting);
        assert!(scheduler.submit(task(0)).await.is_err());
    }
}
