//! Scheduler for the AgentOS agent engine.
//!
//! Owns the pending-task queue and the fixed pool of execution slots, and
//! decides which task runs next and where. All queue and slot mutations go
//! through one mutex-guarded critical section; [`Scheduler::try_assign`] is
//! the only path that moves a task from queued to running.
//!
//! # Main types
//!
//! - [`Scheduler`] — Submission, assignment, release, and cancellation.
//! - [`PendingQueue`] — Priority queue with FIFO tie-break.
//! - [`SlotPool`] — Fixed-size pool of [`Slot`]s.
//! - [`Grant`] — A task bound to a slot, handed to the orchestrator.

/// Scheduler configuration.
pub mod config;
/// Pending-task priority queue.
pub mod queue;
/// The scheduler.
pub mod scheduler;
/// Execution slots.
pub mod slots;

pub use config::SchedulerConfig;
pub use queue::PendingQueue;
pub use scheduler::{CancelOutcome, Grant, GrantReceiver, Scheduler, SchedulerStats};
pub use slots::{Slot, SlotId, SlotPool};
