//! Orchestrator for the AgentOS agent engine.
//!
//! Consumes slot grants from the [`agentos_scheduler::Scheduler`] and drives
//! each granted task through its steps, strictly in order, applying the
//! retry policy to failed steps and honouring cancellation at step
//! boundaries. Every task it drives ends with exactly one terminal event.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Grant dispatcher and per-task drivers.
//! - [`StepExecutor`] — Runs one tool-call or memory step under a timeout.
//! - [`RetryPolicy`] — Bounded exponential backoff.
//! - [`EngineMonitor`] — Counters and an archive of finished tasks.

/// Orchestrator configuration.
pub mod config;
/// Execution counters and finished-task archive.
pub mod monitor;
/// The orchestrator.
pub mod orchestrator;
/// Step retry policy.
pub mod retry;
/// Single-step execution.
pub mod step;

pub use config::OrchestratorConfig;
pub use monitor::{ActiveTask, EngineMetrics, EngineMonitor, TaskRecord};
pub use orchestrator::Orchestrator;
pub use retry::RetryPolicy;
pub use step::StepExecutor;
