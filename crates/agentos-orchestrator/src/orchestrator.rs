use crate::config::OrchestratorConfig;
use crate::monitor::EngineMonitor;
use crate::step::StepExecutor;
use agentos_bus::{handler_fn, IdempotentHandler, MessageBus, Subscription};
use agentos_core::{
    AgentosError, AgentosResult, Component, Event, MemoryStore, Task, TaskId, Topic,
};
use agentos_scheduler::{Grant, GrantReceiver, Scheduler, SlotId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Attempts for progress and terminal events.
const EVENT_PUBLISH_ATTEMPTS: u32 = 3;

/// How a driven task ended.
enum Outcome {
    Completed {
        outputs: Vec<serde_json::Value>,
    },
    Failed {
        error: String,
        step_index: usize,
        attempts: u32,
    },
    Cancelled {
        completed_steps: usize,
    },
}

#[derive(Default)]
struct CancelRegistry {
    /// Cancellation flag of every task a driver currently holds.
    active: HashMap<TaskId, CancellationToken>,
    /// Cancel requests that arrived before the grant reached a driver,
    /// keyed by the grant sequence they were aimed at.
    early: HashMap<TaskId, u64>,
}

struct Inner {
    config: OrchestratorConfig,
    scheduler: Arc<Scheduler>,
    bus: Arc<MessageBus>,
    executor: StepExecutor,
    monitor: Arc<EngineMonitor>,
    cancels: Mutex<CancelRegistry>,
    drivers: TaskTracker,
    stopping: AtomicBool,
}

/// Grant loop state while the orchestrator is started.
struct Dispatcher {
    token: CancellationToken,
    handle: JoinHandle<GrantReceiver>,
    subscription: Subscription,
}

/// Drives granted tasks through their steps.
///
/// One driver per granted task; drivers run concurrently up to the slot
/// capacity while each task's own steps run strictly in sequence.
pub struct Orchestrator {
    inner: Arc<Inner>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl Orchestrator {
    /// Stopped orchestrator; `start` attaches it to the scheduler.
    pub fn new(
        scheduler: Arc<Scheduler>,
        bus: Arc<MessageBus>,
        memory: Arc<dyn MemoryStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let executor = StepExecutor::new(bus.clone(), memory, config.step_timeout());
        let monitor = Arc::new(EngineMonitor::new(config.archive_capacity));
        Self {
            inner: Arc::new(Inner {
                config,
                scheduler,
                bus,
                executor,
                monitor,
                cancels: Mutex::new(CancelRegistry::default()),
                drivers: TaskTracker::new(),
                stopping: AtomicBool::new(false),
            }),
            dispatcher: Mutex::new(None),
        }
    }

    /// Configuration the orchestrator was built with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Metrics and archive of driven tasks.
    pub fn monitor(&self) -> &Arc<EngineMonitor> {
        &self.inner.monitor
    }

    /// Whether the grant dispatcher is running.
    pub fn is_running(&self) -> bool {
        self.dispatcher.lock().is_some()
    }

    /// Ids of the tasks currently held by a driver.
    pub fn active_tasks(&self) -> Vec<TaskId> {
        self.inner.cancels.lock().active.keys().copied().collect()
    }

    /// Begin executing a granted task on its slot.
    pub fn on_granted(&self, grant: Grant) {
        self.inner.on_granted(grant);
    }

    /// Flag a running task for cancellation.
    ///
    /// Takes effect at the task's next step boundary. Returns false when the
    /// task is not running here.
    pub fn on_cancel_request(&self, task_id: TaskId) -> bool {
        self.inner.on_cancel_request(task_id)
    }
}

impl Inner {
    fn on_granted(self: &Arc<Self>, grant: Grant) {
        let seq = grant.seq();
        let Grant { task, slot_id, .. } = grant;
        let token = CancellationToken::new();
        {
            let mut cancels = self.cancels.lock();
            // A flag aimed at an earlier run of a reused id does not apply.
            if cancels.early.remove(&task.id) == Some(seq) {
                token.cancel();
            }
            cancels.active.insert(task.id, token.clone());
        }
        debug!(task_id = %task.id, slot_id = %slot_id, "Driver spawned");
        let inner = self.clone();
        self.drivers
            .spawn(async move { inner.drive(task, slot_id, token).await });
    }

    fn on_cancel_request(&self, task_id: TaskId) -> bool {
        let mut cancels = self.cancels.lock();
        if let Some(token) = cancels.active.get(&task_id) {
            token.cancel();
            info!(task_id = %task_id, "Cancellation flagged");
            return true;
        }
        // Granted but not yet picked up by the dispatcher.
        if let Some(seq) = self.scheduler.grant_seq(task_id) {
            cancels
                .early
                .retain(|id, pending| self.scheduler.grant_seq(*id) == Some(*pending));
            cancels.early.insert(task_id, seq);
            info!(task_id = %task_id, "Cancellation flagged before dispatch");
            return true;
        }
        debug!(task_id = %task_id, "Cancel request for a task not running here");
        false
    }

    async fn drive(self: Arc<Self>, mut task: Task, slot_id: SlotId, token: CancellationToken) {
        let task_id = task.id;
        let started = Instant::now();
        self.monitor.start_task(&task, slot_id).await;
        info!(task_id = %task_id, slot_id = %slot_id, steps = task.steps.len(), "Task started");

        self.publish(Event::new(
            Topic::TaskStarted,
            task_id,
            serde_json::json!({
                "agent_id": task.agent_id,
                "slot_id": slot_id,
                "steps": task.steps.len(),
            }),
        ))
        .await;

        let outcome = self.run_steps(&mut task, &token).await;
        let (topic, data) = self.conclude(&mut task, outcome);

        {
            // Under the registry lock: a cancel request sees this task either
            // active or no longer running, never in between.
            let mut cancels = self.cancels.lock();
            cancels.active.remove(&task_id);
            cancels.early.remove(&task_id);
            if let Err(e) = self.scheduler.release(slot_id) {
                error!(task_id = %task_id, slot_id = %slot_id, error = %e, "Failed to release slot");
            }
        }
        self.publish(Event::new(topic, task_id, data)).await;

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.monitor.finish_task(&task, duration_ms).await;
        info!(task_id = %task_id, state = %task.state, duration_ms, "Task finished");
    }

    /// Execute every step in order, retrying failed attempts per the policy.
    async fn run_steps(&self, task: &mut Task, token: &CancellationToken) -> Outcome {
        let policy = &self.config.retry;
        let mut outputs = Vec::with_capacity(task.steps.len());

        for index in 0..task.steps.len() {
            if token.is_cancelled() {
                return Outcome::Cancelled {
                    completed_steps: index,
                };
            }
            if let Err(e) = task.begin_step(index) {
                return Outcome::Failed {
                    error: e.to_string(),
                    step_index: index,
                    attempts: 0,
                };
            }
            self.monitor.enter_step(task.id, index).await;

            let mut attempt = 1;
            let output = loop {
                match self.executor.execute(task, index).await {
                    Ok(output) => break output,
                    Err(e) if e.is_retryable() && policy.allows_retry(attempt) => {
                        let delay = policy.delay_for(attempt);
                        warn!(
                            task_id = %task.id,
                            step = index,
                            attempt,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %e,
                            "Step failed, backing off"
                        );
                        task.retry_count += 1;
                        task.last_error = Some(e.to_string());
                        self.monitor.record_retry().await;
                        tokio::select! {
                            biased;
                            () = token.cancelled() => {
                                return Outcome::Cancelled { completed_steps: index };
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                        attempt += 1;
                    }
                    Err(e) => {
                        warn!(task_id = %task.id, step = index, attempt, error = %e, "Step failed");
                        return Outcome::Failed {
                            error: e.to_string(),
                            step_index: index,
                            attempts: attempt,
                        };
                    }
                }
            };

            task.last_error = None;
            self.monitor.record_step().await;
            debug!(task_id = %task.id, step = index, attempt, "Step completed");
            self.publish(Event::new(
                Topic::TaskProgress,
                task.id,
                serde_json::json!({
                    "step_index": index,
                    "step": task.steps[index].describe(),
                    "attempts": attempt,
                    "output": output,
                }),
            ))
            .await;
            outputs.push(output);
        }

        if token.is_cancelled() {
            return Outcome::Cancelled {
                completed_steps: task.steps.len(),
            };
        }
        Outcome::Completed { outputs }
    }

    /// Apply the terminal transition and build the matching event payload.
    fn conclude(&self, task: &mut Task, outcome: Outcome) -> (Topic, serde_json::Value) {
        match outcome {
            Outcome::Completed { outputs } => {
                let done = task.finalize().and_then(|()| task.complete());
                match done {
                    Ok(()) => (
                        Topic::TaskCompleted,
                        serde_json::json!({
                            "agent_id": task.agent_id,
                            "outputs": outputs,
                            "retry_count": task.retry_count,
                        }),
                    ),
                    Err(e) => self.conclude(
                        task,
                        Outcome::Failed {
                            error: e.to_string(),
                            step_index: task.steps.len(),
                            attempts: 0,
                        },
                    ),
                }
            }
            Outcome::Failed {
                error,
                step_index,
                attempts,
            } => {
                if let Err(e) = task.fail(error.clone()) {
                    error!(task_id = %task.id, error = %e, "Could not mark task failed");
                }
                (
                    Topic::TaskFailed,
                    serde_json::json!({
                        "agent_id": task.agent_id,
                        "error": error,
                        "step_index": step_index,
                        "attempts": attempts,
                        "retry_count": task.retry_count,
                    }),
                )
            }
            Outcome::Cancelled { completed_steps } => {
                if let Err(e) = task.cancel() {
                    error!(task_id = %task.id, error = %e, "Could not mark task cancelled");
                }
                let reason = if self.stopping.load(Ordering::SeqCst) {
                    "orchestrator stopped"
                } else {
                    "cancel requested"
                };
                (
                    Topic::TaskCancelled,
                    serde_json::json!({
                        "agent_id": task.agent_id,
                        "reason": reason,
                        "completed_steps": completed_steps,
                        "error": task.last_error,
                    }),
                )
            }
        }
    }

    async fn publish(&self, event: Event) {
        let (topic, task_id) = (event.topic, event.task_id);
        if let Err(e) = self.bus.publish_reliably(event, EVENT_PUBLISH_ATTEMPTS).await {
            error!(task_id = %task_id, topic = %topic, error = %e, "Event could not be published");
        }
    }
}

fn cancel_listener(inner: Weak<Inner>, dedupe_window: usize) -> impl agentos_bus::EventHandler {
    IdempotentHandler::new(
        handler_fn(move |event: Event| {
            let inner = inner.clone();
            async move {
                if let Some(inner) = inner.upgrade() {
                    inner.on_cancel_request(event.task_id);
                }
            }
        }),
        dedupe_window,
    )
}

#[async_trait]
impl Component for Orchestrator {
    fn name(&self) -> &str {
        "orchestrator"
    }

    async fn start(&self) -> AgentosResult<()> {
        if self.is_running() {
            return Err(AgentosError::Lifecycle(
                "Orchestrator already started".to_string(),
            ));
        }

        let mut grants = self.inner.scheduler.attach()?;
        let subscription = match self.inner.bus.subscribe(
            Topic::CancelRequested,
            cancel_listener(Arc::downgrade(&self.inner), self.inner.config.dedupe_window),
        ) {
            Ok(subscription) => subscription,
            Err(e) => {
                self.inner.scheduler.detach(grants);
                return Err(e);
            }
        };

        self.inner.stopping.store(false, Ordering::SeqCst);
        self.inner.drivers.reopen();

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = loop_token.cancelled() => break,
                    next = grants.recv() => match next {
                        Some(grant) => inner.on_granted(grant),
                        None => break,
                    },
                }
            }
            debug!("Grant dispatcher exited");
            grants
        });

        *self.dispatcher.lock() = Some(Dispatcher {
            token,
            handle,
            subscription,
        });
        info!(
            max_attempts = self.inner.config.retry.max_attempts,
            step_timeout_ms = self.inner.config.step_timeout_ms,
            "Orchestrator started"
        );
        Ok(())
    }

    /// Stop taking grants, hand unstarted ones back, and wait for drivers.
    ///
    /// Running tasks are flagged for cancellation and end at their next step
    /// boundary with a `task.cancelled` event.
    async fn stop(&self) {
        let Some(dispatcher) = self.dispatcher.lock().take() else {
            return;
        };
        self.inner.stopping.store(true, Ordering::SeqCst);

        dispatcher.token.cancel();
        match dispatcher.handle.await {
            Ok(grants) => self.inner.scheduler.detach(grants),
            Err(e) => error!(error = %e, "Grant dispatcher panicked"),
        }

        let in_flight = {
            let cancels = self.inner.cancels.lock();
            for token in cancels.active.values() {
                token.cancel();
            }
            cancels.active.len()
        };
        self.inner.drivers.close();
        self.inner.drivers.wait().await;
        self.inner.cancels.lock().early.clear();
        dispatcher.subscription.cancel();
        info!(in_flight, "Orchestrator stopped");
    }
}
