#![allow(clippy::unwrap_used, clippy::expect_used)]

use agentos_bus::*;
use agentos_core::*;
use agentos_engine::*;
use agentos_orchestrator::RetryPolicy;
use agentos_scheduler::CancelOutcome;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Tracks how many calls are in flight at once.
#[derive(Default)]
struct ProbeTool {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ToolProvider for ProbeTool {
    async fn invoke(&self, request: ToolCallRequest) -> AgentosResult<ToolCallResult> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(15)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ToolCallResult::success(request.task_id, json!({"probe": now})))
    }
}

/// Fails the first `failures` calls with a remote error.
struct FlakyTool {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl ToolProvider for FlakyTool {
    async fn invoke(&self, request: ToolCallRequest) -> AgentosResult<ToolCallResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(AgentosError::Execution(format!("attempt {call} failed")));
        }
        Ok(ToolCallResult::success(request.task_id, json!({"call": call})))
    }
}

/// Holds each call until released.
#[derive(Default)]
struct GateTool {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl ToolProvider for GateTool {
    async fn invoke(&self, request: ToolCallRequest) -> AgentosResult<ToolCallResult> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ToolCallResult::success(request.task_id, json!("opened")))
    }
}

/// Every event published on the bus, in delivery order.
#[derive(Clone, Default)]
struct Journal {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Journal {
    fn attach(&self, bus: &MessageBus) -> Vec<Subscription> {
        Topic::ALL
            .into_iter()
            .map(|topic| {
                let events = self.events.clone();
                bus.subscribe(
                    topic,
                    handler_fn(move |event| {
                        let events = events.clone();
                        async move { events.lock().push(event) }
                    }),
                )
                .unwrap()
            })
            .collect()
    }

    fn of(&self, task_id: TaskId, topic: Topic) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id && e.topic == topic)
            .cloned()
            .collect()
    }

    fn terminal_count(&self, task_id: TaskId) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id && e.topic.is_terminal())
            .count()
    }

    async fn terminal(&self, task_id: TaskId) -> Event {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let found = self
                    .events
                    .lock()
                    .iter()
                    .find(|e| e.task_id == task_id && e.topic.is_terminal())
                    .cloned();
                if let Some(event) = found {
                    return event;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no terminal event")
    }

    fn started_order(&self) -> Vec<TaskId> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.topic == Topic::TaskStarted)
            .map(|e| e.task_id)
            .collect()
    }
}

fn config(slots: usize, max_pending: usize) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.scheduler.slots = slots;
    config.scheduler.max_pending = max_pending;
    config.orchestrator.step_timeout_ms = 2_000;
    config.orchestrator.retry = RetryPolicy {
        max_attempts: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 10,
    };
    config
}

fn task(steps: Vec<Step>) -> Task {
    Task::new(AgentId::new("agent-e2e"), steps)
}

async fn started(builder: EngineBuilder) -> (Engine, Journal, Vec<Subscription>) {
    let engine = builder.with_builtins().build().unwrap();
    engine.start().await.unwrap();
    let journal = Journal::default();
    let subs = journal.attach(engine.bus());
    (engine, journal, subs)
}

// ---------------------------------------------------------------------------
// Concurrency bound
// ---------------------------------------------------------------------------

#[tokio::test]
async fn running_tasks_never_exceed_slot_capacity() {
    let probe = Arc::new(ProbeTool::default());
    let (engine, journal, _subs) =
        started(Engine::builder(config(3, 64)).with_tool("probe", probe.clone())).await;

    let mut ids = Vec::new();
    for _ in 0..12 {
        ids.push(
            engine
                .submit(task(vec![
                    Step::tool("probe", json!({})),
                    Step::tool("probe", json!({})),
                ]))
                .await
                .unwrap(),
        );
        assert!(engine.scheduler().stats().running <= 3);
    }
    for id in &ids {
        assert_eq!(journal.terminal(*id).await.topic, Topic::TaskCompleted);
    }

    assert!(probe.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(engine.monitor().metrics().await.completed, 12);
    engine.stop().await;
}

// ---------------------------------------------------------------------------
// Terminal events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_task_gets_exactly_one_terminal_event() {
    let gate = Arc::new(GateTool::default());
    let flaky = Arc::new(FlakyTool {
        failures: 100,
        calls: AtomicU32::new(0),
    });
    let (engine, journal, _subs) = started(
        Engine::builder(config(1, 16))
            .with_tool("gate", gate.clone())
            .with_tool("flaky", flaky),
    )
    .await;

    let blocker = engine
        .submit(task(vec![Step::tool("gate", json!({}))]))
        .await
        .unwrap();
    gate.entered.notified().await;
    let ok = engine
        .submit(task(vec![Step::tool("echo", json!({"v": 1}))]))
        .await
        .unwrap();
    let bad = engine
        .submit(task(vec![Step::tool("flaky", json!({}))]))
        .await
        .unwrap();
    let dropped = engine
        .submit(task(vec![Step::tool("echo", json!({}))]))
        .await
        .unwrap();
    assert_eq!(
        engine.cancel(dropped).await.unwrap(),
        CancelOutcome::Cancelled
    );
    gate.release.notify_one();

    assert_eq!(journal.terminal(blocker).await.topic, Topic::TaskCompleted);
    assert_eq!(journal.terminal(ok).await.topic, Topic::TaskCompleted);
    assert_eq!(journal.terminal(bad).await.topic, Topic::TaskFailed);
    assert_eq!(journal.terminal(dropped).await.topic, Topic::TaskCancelled);

    // Quiesce, then count.
    tokio::time::sleep(Duration::from_millis(50)).await;
    for id in [blocker, ok, bad, dropped] {
        assert_eq!(journal.terminal_count(id), 1, "task {id}");
    }
    engine.stop().await;
}

#[tokio::test]
async fn stop_with_work_in_flight_still_ends_every_task() {
    let gate = Arc::new(GateTool::default());
    let (engine, journal, _subs) =
        started(Engine::builder(config(1, 16)).with_tool("gate", gate.clone())).await;

    let running = engine
        .submit(task(vec![Step::tool("gate", json!({})), Step::tool("echo", json!({}))]))
        .await
        .unwrap();
    gate.entered.notified().await;
    let queued_a = engine.submit(task(vec![Step::memory_read("k")])).await.unwrap();
    let queued_b = engine.submit(task(vec![Step::memory_read("k")])).await.unwrap();

    let opener = {
        let gate = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            gate.release.notify_one();
        })
    };
    // Shut down the task components first so the journal still receives
    // their final events over the running bus.
    engine.orchestrator().stop().await;
    engine.scheduler().stop().await;
    opener.await.unwrap();

    for id in [running, queued_a, queued_b] {
        assert_eq!(journal.terminal(id).await.topic, Topic::TaskCancelled);
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    for id in [running, queued_a, queued_b] {
        assert_eq!(journal.terminal_count(id), 1, "task {id}");
    }
    engine.stop().await;
}

// ---------------------------------------------------------------------------
// Step order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_follows_step_order() {
    let (engine, journal, _subs) = started(Engine::builder(config(2, 16))).await;
    let id = engine
        .submit(task(vec![
            Step::memory_write("draft", json!("v1")),
            Step::tool("echo", json!({"stage": "review"})),
            Step::memory_read("draft"),
            Step::tool("sleep", json!({"ms": 5})),
        ]))
        .await
        .unwrap();

    let done = journal.terminal(id).await;
    assert_eq!(done.topic, Topic::TaskCompleted);
    assert_eq!(done.data["outputs"][2], "v1");

    let progress = journal.of(id, Topic::TaskProgress);
    let indices: Vec<u64> = progress
        .iter()
        .map(|e| e.data["step_index"].as_u64().unwrap())
        .collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    assert_eq!(progress[1].data["output"]["stage"], "review");
    engine.stop().await;
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_queued_task_never_occupies_a_slot() {
    let gate = Arc::new(GateTool::default());
    let (engine, journal, _subs) =
        started(Engine::builder(config(1, 16)).with_tool("gate", gate.clone())).await;

    let blocker = engine
        .submit(task(vec![Step::tool("gate", json!({}))]))
        .await
        .unwrap();
    gate.entered.notified().await;
    let queued = engine
        .submit(task(vec![Step::tool("echo", json!({}))]))
        .await
        .unwrap();
    assert_eq!(engine.scheduler().state_of(queued), Some("queued"));

    assert_eq!(
        engine.cancel(queued).await.unwrap(),
        CancelOutcome::Cancelled
    );
    assert_eq!(journal.terminal(queued).await.topic, Topic::TaskCancelled);
    gate.release.notify_one();
    journal.terminal(blocker).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(journal.of(queued, Topic::TaskStarted).is_empty());
    assert!(engine.monitor().record(queued).await.is_none());
    assert_eq!(engine.monitor().metrics().await.started, 1);
    engine.stop().await;
}

#[tokio::test]
async fn cancelling_a_running_task_waits_for_the_current_step() {
    let gate = Arc::new(GateTool::default());
    let (engine, journal, _subs) =
        started(Engine::builder(config(1, 16)).with_tool("gate", gate.clone())).await;

    let id = engine
        .submit(task(vec![
            Step::tool("gate", json!({})),
            Step::tool("echo", json!({})),
            Step::tool("echo", json!({})),
        ]))
        .await
        .unwrap();
    gate.entered.notified().await;
    assert_eq!(engine.cancel(id).await.unwrap(), CancelOutcome::Requested);
    tokio::time::sleep(Duration::from_millis(30)).await;
    // Still mid-step: nothing terminal yet.
    assert_eq!(journal.terminal_count(id), 0);

    gate.release.notify_one();
    let event = journal.terminal(id).await;
    assert_eq!(event.topic, Topic::TaskCancelled);
    assert_eq!(event.data["completed_steps"], 1);
    assert_eq!(journal.of(id, Topic::TaskProgress).len(), 1);
    engine.stop().await;
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn step_that_recovers_within_budget_completes_without_error() {
    let flaky = Arc::new(FlakyTool {
        failures: 2,
        calls: AtomicU32::new(0),
    });
    let (engine, journal, _subs) =
        started(Engine::builder(config(1, 16)).with_tool("flaky", flaky.clone())).await;

    let id = engine
        .submit(task(vec![Step::tool("flaky", json!({}))]))
        .await
        .unwrap();
    let done = journal.terminal(id).await;
    assert_eq!(done.topic, Topic::TaskCompleted);
    assert_eq!(done.data["outputs"][0]["call"], 3);
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let record = engine.monitor().record(id).await.unwrap();
    assert_eq!(record.state, "completed");
    assert!(record.error.is_none());
    assert_eq!(record.retry_count, 2);
    engine.stop().await;
}

#[tokio::test]
async fn step_failing_every_attempt_fails_the_task_with_last_error() {
    let flaky = Arc::new(FlakyTool {
        failures: 3,
        calls: AtomicU32::new(0),
    });
    let (engine, journal, _subs) =
        started(Engine::builder(config(1, 16)).with_tool("flaky", flaky.clone())).await;

    let id = engine
        .submit(task(vec![Step::tool("flaky", json!({}))]))
        .await
        .unwrap();
    let failed = journal.terminal(id).await;
    assert_eq!(failed.topic, Topic::TaskFailed);
    assert!(failed.data["error"]
        .as_str()
        .unwrap()
        .contains("attempt 3 failed"));
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let record = engine.monitor().record(id).await.unwrap();
    assert_eq!(record.state, "failed");
    assert!(record.error.unwrap().contains("attempt 3 failed"));
    engine.stop().await;
}

// ---------------------------------------------------------------------------
// Scheduling scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn highest_priority_runs_first_with_one_slot() {
    let gate = Arc::new(GateTool::default());
    let (engine, journal, _subs) =
        started(Engine::builder(config(1, 16)).with_tool("gate", gate.clone())).await;

    let blocker = engine
        .submit(task(vec![Step::tool("gate", json!({}))]))
        .await
        .unwrap();
    gate.entered.notified().await;

    let low_a = engine
        .submit(task(vec![Step::memory_read("x")]).with_priority(1))
        .await
        .unwrap();
    let high = engine
        .submit(task(vec![Step::memory_read("x")]).with_priority(5))
        .await
        .unwrap();
    let low_b = engine
        .submit(task(vec![Step::memory_read("x")]).with_priority(1))
        .await
        .unwrap();
    gate.release.notify_one();

    for id in [low_a, high, low_b] {
        journal.terminal(id).await;
    }
    assert_eq!(journal.started_order(), vec![blocker, high, low_a, low_b]);
    engine.stop().await;
}

#[tokio::test]
async fn empty_step_list_is_rejected_and_never_queued() {
    let (engine, journal, _subs) = started(Engine::builder(config(1, 16))).await;
    let empty = task(vec![]);
    let id = empty.id;
    let err = engine.submit(empty).await.unwrap_err();
    assert!(matches!(err, AgentosError::Validation(_)));
    assert!(engine.scheduler().state_of(id).is_none());
    assert_eq!(engine.scheduler().stats().pending, 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(journal.events.lock().iter().all(|e| e.task_id != id));
    engine.stop().await;
}

#[tokio::test]
async fn third_pending_task_exceeds_queue_bound() {
    let gate = Arc::new(GateTool::default());
    let (engine, _journal, _subs) =
        started(Engine::builder(config(1, 2)).with_tool("gate", gate.clone())).await;

    engine
        .submit(task(vec![Step::tool("gate", json!({}))]))
        .await
        .unwrap();
    gate.entered.notified().await;
    engine.submit(task(vec![Step::memory_read("a")])).await.unwrap();
    engine.submit(task(vec![Step::memory_read("b")])).await.unwrap();

    let err = engine
        .submit(task(vec![Step::memory_read("c")]))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentosError::CapacityExceeded(_)));
    assert_eq!(engine.scheduler().stats().pending, 2);

    gate.release.notify_one();
    engine.stop().await;
}

// ---------------------------------------------------------------------------
// At-least-once delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn idempotent_consumer_ignores_redelivered_terminal_events() {
    let (engine, journal, _subs) = started(Engine::builder(config(1, 16))).await;

    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    let _dedup = engine
        .bus()
        .subscribe(
            Topic::TaskCompleted,
            IdempotentHandler::new(
                handler_fn(move |_event| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }),
                64,
            ),
        )
        .unwrap();

    let id = engine
        .submit(task(vec![Step::tool("echo", json!({}))]))
        .await
        .unwrap();
    let done = journal.terminal(id).await;

    // Simulate the transport delivering the same event again.
    engine.bus().publish(done.clone()).await.unwrap();
    engine.bus().publish(done).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(journal.terminal_count(id), 3);
    engine.stop().await;
}

#[tokio::test]
async fn redelivered_cancel_request_cancels_once() {
    let gate = Arc::new(GateTool::default());
    let (engine, journal, _subs) =
        started(Engine::builder(config(1, 16)).with_tool("gate", gate.clone())).await;

    let id = engine
        .submit(task(vec![Step::tool("gate", json!({})), Step::tool("echo", json!({}))]))
        .await
        .unwrap();
    gate.entered.notified().await;

    let request = Event::new(Topic::CancelRequested, id, serde_json::Value::Null);
    for _ in 0..3 {
        engine.bus().publish(request.clone()).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    gate.release.notify_one();

    assert_eq!(journal.terminal(id).await.topic, Topic::TaskCancelled);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(journal.terminal_count(id), 1);
    assert_eq!(engine.monitor().metrics().await.cancelled, 1);
    engine.stop().await;
}

// ---------------------------------------------------------------------------
// Batch runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_reports_every_outcome() {
    let engine = Engine::builder(config(2, 16))
        .with_builtins()
        .build()
        .unwrap();
    engine.start().await.unwrap();

    let submissions: Vec<TaskSubmission> = serde_json::from_value(json!([
        {"agent_id": "a", "steps": [{"kind": "tool_call", "tool": "echo", "arguments": {"i": 1}}]},
        {"agent_id": "a", "priority": 3, "steps": [{"kind": "tool_call", "tool": "sleep", "arguments": {"ms": 5}}]},
        {"agent_id": "b", "steps": []},
        {"agent_id": "b", "steps": [{"kind": "tool_call", "tool": "sleep", "arguments": {}}]}
    ]))
    .unwrap();

    let report = run_batch(&engine, submissions, Duration::from_secs(5))
        .await
        .unwrap();
    engine.stop().await;

    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].index, 2);
    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.count("completed"), 2);
    assert_eq!(report.count("failed"), 1);
}
