use crate::engine::Engine;
use agentos_bus::{handler_fn, IdempotentHandler};
use agentos_core::{AgentosError, AgentosResult, Event, TaskId, TaskSubmission, Topic};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Final state of one task in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    /// Task id.
    pub task_id: TaskId,
    /// `completed`, `failed` or `cancelled`.
    pub state: String,
    /// Payload of the terminal event.
    pub data: serde_json::Value,
}

/// A submission the scheduler refused.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    /// Position in the submitted batch.
    pub index: usize,
    /// Why the submission was refused.
    pub error: String,
}

/// Outcome of [`run_batch`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// One entry per accepted task, in submission order.
    pub outcomes: Vec<TaskOutcome>,
    /// Submissions the scheduler refused.
    pub rejected: Vec<Rejection>,
}

impl BatchReport {
    /// Number of outcomes in `state`.
    pub fn count(&self, state: &str) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }
}

fn state_of(topic: Topic) -> &'static str {
    match topic {
        Topic::TaskCompleted => "completed",
        Topic::TaskFailed => "failed",
        _ => "cancelled",
    }
}

/// Submit `submissions` to a started engine and wait until every accepted
/// task has published its terminal event, or `timeout` elapses.
pub async fn run_batch(
    engine: &Engine,
    submissions: Vec<TaskSubmission>,
    timeout: Duration,
) -> AgentosResult<BatchReport> {
    let terminal: Arc<Mutex<HashMap<TaskId, Event>>> = Arc::new(Mutex::new(HashMap::new()));
    let notify = Arc::new(Notify::new());

    let mut subscriptions = Vec::new();
    for topic in Topic::ALL.into_iter().filter(Topic::is_terminal) {
        let terminal = terminal.clone();
        let notify = notify.clone();
        let handler = IdempotentHandler::new(
            handler_fn(move |event: Event| {
                let terminal = terminal.clone();
                let notify = notify.clone();
                async move {
                    terminal.lock().entry(event.task_id).or_insert(event);
                    notify.notify_waiters();
                }
            }),
            engine.config().orchestrator.dedupe_window,
        );
        subscriptions.push(engine.bus().subscribe(topic, handler)?);
    }

    let mut accepted = Vec::with_capacity(submissions.len());
    let mut report = BatchReport::default();
    for (index, submission) in submissions.into_iter().enumerate() {
        match engine.submit_request(submission).await {
            Ok(id) => accepted.push(id),
            Err(e) => {
                warn!(index, error = %e, "Submission rejected");
                report.rejected.push(Rejection {
                    index,
                    error: e.to_string(),
                });
            }
        }
    }
    info!(
        accepted = accepted.len(),
        rejected = report.rejected.len(),
        "Batch submitted"
    );

    let waited = tokio::time::timeout(timeout, async {
        loop {
            let notified = notify.notified();
            {
                let seen = terminal.lock();
                if accepted.iter().all(|id| seen.contains_key(id)) {
                    break;
                }
            }
            notified.await;
        }
    })
    .await;

    for subscription in &subscriptions {
        subscription.cancel();
    }
    if waited.is_err() {
        return Err(AgentosError::Timeout(format!(
            "Batch did not reach quiescence within {} ms",
            timeout.as_millis()
        )));
    }

    let seen = terminal.lock();
    report.outcomes = accepted
        .iter()
        .filter_map(|id| seen.get(id))
        .map(|event| TaskOutcome {
            task_id: event.task_id,
            state: state_of(event.topic).to_string(),
            data: event.data.clone(),
        })
        .collect();
    Ok(report)
}
