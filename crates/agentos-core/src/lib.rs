//! Core types and error definitions for the AgentOS agent engine.
//!
//! This crate provides the foundational types shared by the communication
//! layer, the scheduler, and the orchestrator.
//!
//! # Main types
//!
//! - [`AgentosError`] — Unified error enum for all engine components.
//! - [`AgentosResult`] — Convenience alias for `Result<T, AgentosError>`.
//! - [`Task`] — One agent execution request with an ordered list of [`Step`]s.
//! - [`TaskState`] — Lifecycle state machine (`Queued → Running → terminal`).
//! - [`Event`] / [`Topic`] — Immutable messages published on named topics.
//! - [`ToolCallRequest`] / [`ToolCallResult`] — Synchronous tool invocation pair.
//! - [`MemoryStore`] — Narrow read/write contract to an external memory store.
//! - [`Component`] — Start/stop lifecycle shared by every engine component.

/// Error types.
pub mod error;
/// Events and topics.
pub mod event;
/// Component lifecycle trait.
pub mod lifecycle;
/// External memory store contract and an in-memory implementation.
pub mod memory;
/// Task lifecycle state machine.
pub mod state;
/// Tasks, steps, and submissions.
pub mod task;
/// Tool invocation contract.
pub mod tool;

pub use error::{AgentosError, AgentosResult};
pub use event::{Event, Topic};
pub use lifecycle::Component;
pub use memory::{InMemoryMemoryStore, MemoryStore};
pub use state::{RunPhase, TaskState};
pub use task::{AgentId, Step, Task, TaskId, TaskSubmission};
pub use tool::{ToolCallRequest, ToolCallResult, ToolProvider};
