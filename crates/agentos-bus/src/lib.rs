//! Communication layer for the AgentOS agent engine.
//!
//! Pure transport plus topic registry: typed [`Event`](agentos_core::Event)s
//! are published on named topics and fanned out to every current subscriber;
//! tool invocations use synchronous request/reply through registered
//! [`ToolProvider`](agentos_core::ToolProvider)s.
//!
//! Delivery is at-least-once. Subscribers must be idempotent; wrap a handler
//! in [`IdempotentHandler`] to drop redelivered events.
//!
//! # Main types
//!
//! - [`MessageBus`] — Publish/subscribe and request/reply endpoint.
//! - [`Subscription`] — Cancellable handle returned by [`MessageBus::subscribe`].
//! - [`EventHandler`] — Callback invoked for each delivered event.
//! - [`Transport`] — Connection to the message bus endpoint.
//! - [`BusConfig`] — Endpoint, enqueue timeout, and buffer sizing.

/// The message bus.
pub mod bus;
/// Bus configuration.
pub mod config;
/// Event handlers and the idempotent wrapper.
pub mod handler;
/// Transport connection seam.
pub mod transport;

pub use bus::{BusStats, MessageBus, Subscription};
pub use config::BusConfig;
pub use handler::{handler_fn, EventHandler, FnHandler, IdempotentHandler};
pub use transport::{transport_for, InProcessTransport, Transport};
