use agentos_core::{AgentosError, AgentosResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Connection to a message bus endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Endpoint this transport connects to.
    fn endpoint(&self) -> &str;

    /// Acquire the connection. Fails with `Connection` if unreachable.
    async fn connect(&self) -> AgentosResult<()>;

    /// Release the connection. Must be safe to call more than once and from
    /// a non-async context (it runs from `Drop`).
    fn disconnect(&self);

    /// Whether the connection is currently held.
    fn is_connected(&self) -> bool;
}

/// Transport for `memory://` endpoints: delivery stays inside the process.
pub struct InProcessTransport {
    endpoint: String,
    connected: AtomicBool,
}

impl InProcessTransport {
    /// Disconnected transport for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> AgentosResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        info!(endpoint = %self.endpoint, "In-process transport connected");
        Ok(())
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(endpoint = %self.endpoint, "In-process transport disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Resolve the transport for a configured endpoint.
pub fn transport_for(endpoint: &str) -> AgentosResult<Arc<dyn Transport>> {
    match endpoint.split_once("://") {
        Some(("memory", name)) if !name.is_empty() => {
            Ok(Arc::new(InProcessTransport::new(endpoint)))
        }
        Some((scheme, _)) => Err(AgentosError::Connection(format!(
            "Unsupported message bus endpoint '{endpoint}' (scheme '{scheme}')"
        ))),
        None => Err(AgentosError::Connection(format!(
            "Malformed message bus endpoint '{endpoint}'"
        ))),
    }
}
