use crate::builtins::register_builtins;
use crate::config::EngineConfig;
use agentos_bus::MessageBus;
use agentos_core::{
    AgentosResult, Component, InMemoryMemoryStore, MemoryStore, Task, TaskId, TaskSubmission,
    ToolProvider,
};
use agentos_orchestrator::{EngineMonitor, Orchestrator};
use agentos_scheduler::{CancelOutcome, Scheduler};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};

/// Assembles an [`Engine`] from its configuration and collaborators.
pub struct EngineBuilder {
    config: EngineConfig,
    memory: Option<Arc<dyn MemoryStore>>,
    tools: Vec<(String, Arc<dyn ToolProvider>)>,
    builtins: bool,
}

impl EngineBuilder {
    /// Builder with the default in-memory store and no tools.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            memory: None,
            tools: Vec::new(),
            builtins: false,
        }
    }

    /// Use `memory` instead of the default in-memory store.
    pub fn with_memory_store(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Register a tool provider under `name`.
    pub fn with_tool(mut self, name: impl Into<String>, provider: Arc<dyn ToolProvider>) -> Self {
        self.tools.push((name.into(), provider));
        self
    }

    /// Register the `echo` and `sleep` tools.
    pub fn with_builtins(mut self) -> Self {
        self.builtins = true;
        self
    }

    /// Validate the configuration and wire the components.
    pub fn build(self) -> AgentosResult<Engine> {
        self.config.validate()?;

        let bus = Arc::new(MessageBus::new(self.config.bus.clone()));
        if self.builtins {
            register_builtins(&bus);
        }
        for (name, provider) in self.tools {
            bus.register_tool(name, provider);
        }

        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(InMemoryMemoryStore::new()));
        let scheduler = Arc::new(Scheduler::new(bus.clone(), self.config.scheduler.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            scheduler.clone(),
            bus.clone(),
            memory,
            self.config.orchestrator.clone(),
        ));

        let components = vec![
            bus.clone() as Arc<dyn Component>,
            scheduler.clone() as Arc<dyn Component>,
            orchestrator.clone() as Arc<dyn Component>,
        ];

        Ok(Engine {
            config: self.config,
            bus,
            scheduler,
            orchestrator,
            components,
            started: Mutex::new(Vec::new()),
        })
    }
}

/// The composed engine: communication layer, scheduler, and orchestrator.
///
/// Components start in that order and stop in reverse.
pub struct Engine {
    config: EngineConfig,
    bus: Arc<MessageBus>,
    scheduler: Arc<Scheduler>,
    orchestrator: Arc<Orchestrator>,
    components: Vec<Arc<dyn Component>>,
    started: Mutex<Vec<Arc<dyn Component>>>,
}

impl Engine {
    /// Start building an engine.
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Start every component in order.
    ///
    /// If one fails, the ones already started are stopped again in reverse
    /// order and the error is returned.
    pub async fn start(&self) -> AgentosResult<()> {
        let mut started: Vec<Arc<dyn Component>> = Vec::with_capacity(self.components.len());
        for component in &self.components {
            if let Err(e) = component.start().await {
                error!(component = component.name(), error = %e, "Component failed to start");
                for done in started.iter().rev() {
                    done.stop().await;
                }
                return Err(e);
            }
            info!(component = component.name(), "Component started");
            started.push(component.clone());
        }
        *self.started.lock() = started;
        info!("Agent engine started");
        Ok(())
    }

    /// Stop started components in reverse order. Safe to call repeatedly.
    pub async fn stop(&self) {
        let started = std::mem::take(&mut *self.started.lock());
        if started.is_empty() {
            return;
        }
        for component in started.iter().rev() {
            component.stop().await;
            info!(component = component.name(), "Component stopped");
        }
        info!("Agent engine stopped");
    }

    /// Whether `start` succeeded and `stop` has not run since.
    pub fn is_running(&self) -> bool {
        !self.started.lock().is_empty()
    }

    /// Submit a task to the scheduler.
    pub async fn submit(&self, task: Task) -> AgentosResult<TaskId> {
        self.scheduler.submit(task).await
    }

    /// Submit an inbound submission.
    pub async fn submit_request(&self, submission: TaskSubmission) -> AgentosResult<TaskId> {
        self.scheduler.submit(submission.into_task()).await
    }

    /// Cancel a queued or running task.
    pub async fn cancel(&self, task_id: TaskId) -> AgentosResult<CancelOutcome> {
        self.scheduler.cancel(task_id).await
    }

    /// Combined status of every component.
    pub async fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "running": self.is_running(),
            "bus": self.bus.stats(),
            "scheduler": self.scheduler.stats(),
            "orchestrator": self.orchestrator.monitor().to_json().await,
        })
    }

    /// Effective configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Communication layer.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Scheduler.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Orchestrator.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Orchestrator metrics and archive.
    pub fn monitor(&self) -> &Arc<EngineMonitor> {
        self.orchestrator.monitor()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use agentos_core::AgentosError;

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.scheduler.slots = 0;
        assert!(matches!(
            Engine::builder(config).build().err().unwrap(),
            AgentosError::Config(_)
        ));
    }

    #[tokio::test]
    async fn test_start_stop_order() {
        let engine = Engine::builder(EngineConfig::default())
            .with_builtins()
            .build()
            .unwrap();
        engine.start().await.unwrap();
        assert!(engine.is_running());
        assert!(engine.bus().is_running());
        assert!(engine.orchestrator().is_running());
        assert!(engine.scheduler().stats().accepting);

        engine.stop().await;
        assert!(!engine.is_running());
        assert!(!engine.bus().is_running());
        assert!(!engine.orchestrator().is_running());
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_failed_start_unwinds() {
        let mut config = EngineConfig::default();
        config.bus.endpoint = "amqp://broker:5672".to_string();
        let engine = Engine::builder(config).build().unwrap();
        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, AgentosError::Connection(_)));
        assert!(!engine.is_running());
        assert!(!engine.scheduler().stats().accepting);
    }

    #[tokio::test]
    async fn test_status_shape() {
        let engine = Engine::builder(EngineConfig::default()).build().unwrap();
        engine.start().await.unwrap();
        let status = engine.status().await;
        assert_eq!(status["running"], true);
        assert_eq!(status["scheduler"]["capacity"], 4);
        assert!(status["orchestrator"]["metrics"].is_object());
        engine.stop().await;
    }
}
