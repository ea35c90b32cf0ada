use crate::error::AgentosResult;
use async_trait::async_trait;

/// Start/stop lifecycle shared by the engine's components.
///
/// Components start leaf-first (communication, scheduler, orchestrator) and
/// stop in reverse. `stop` must release everything `start` acquired and is a
/// no-op on a component that is not running.
#[async_trait]
pub trait Component: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Acquire resources and begin work. Fails with `Lifecycle` if already started.
    async fn start(&self) -> AgentosResult<()>;

    /// Release everything `start` acquired.
    async fn stop(&self);
}
