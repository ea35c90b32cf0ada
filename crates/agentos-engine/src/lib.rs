//! The AgentOS agent engine.
//!
//! Composes the communication layer, scheduler, and orchestrator into one
//! process lifecycle: ordered startup, reverse-ordered shutdown, and a
//! single submission/cancellation surface.
//!
//! # Main types
//!
//! - [`Engine`] / [`EngineBuilder`] — Component composition and lifecycle.
//! - [`EngineConfig`] — TOML configuration with environment overrides.
//! - [`run_batch`] — Submit a batch of tasks and wait for their outcomes.

/// Batch submission and result collection.
pub mod batch;
/// Built-in tools.
pub mod builtins;
/// Engine configuration.
pub mod config;
/// Engine composition.
pub mod engine;

pub use batch::{run_batch, BatchReport, Rejection, TaskOutcome};
pub use builtins::{register_builtins, EchoTool, SleepTool};
pub use config::{EngineConfig, LogConfig};
pub use engine::{Engine, EngineBuilder};
