use thiserror::Error;

/// A convenience `Result` alias using [`AgentosError`].
pub type AgentosResult<T> = Result<T, AgentosError>;

/// Top-level error type for the agent engine.
///
/// Transport and capacity errors surface immediately to the submitting
/// caller. Step-level errors (`Timeout`, `Remote`, `Execution`) are retried
/// by the orchestrator and only surface through a `task.failed` event.
#[derive(Error, Debug)]
pub enum AgentosError {
    /// A malformed submission, rejected at the boundary.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The pending queue is full; the caller should retry later.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The message bus endpoint is unreachable or the transport is down.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An event could not be enqueued for delivery.
    #[error("Publish error: {0}")]
    Publish(String),

    /// No reply arrived within the configured timeout.
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// The responder reported a failure.
    #[error("Remote error: {0}")]
    Remote(String),

    /// A step-level business failure from a tool or memory operation.
    #[error("Execution error: {0}")]
    Execution(String),

    /// The referenced task or slot is not tracked.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A task state transition that the lifecycle does not allow.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// State the task was in.
        from: String,
        /// State that was requested.
        to: String,
    },

    /// A component was used outside its started lifetime.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentosError {
    /// Whether a step that failed with this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentosError::Timeout(_) | AgentosError::Remote(_) | AgentosError::Execution(_)
        )
    }
}
