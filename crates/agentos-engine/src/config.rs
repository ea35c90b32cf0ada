use agentos_bus::BusConfig;
use agentos_core::{AgentosError, AgentosResult};
use agentos_orchestrator::OrchestratorConfig;
use agentos_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Logging settings for the engine binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

/// Full engine configuration, one section per component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `[bus]` section.
    #[serde(default)]
    pub bus: BusConfig,
    /// `[scheduler]` section.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// `[orchestrator]` section.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// `[log]` section.
    #[serde(default)]
    pub log: LogConfig,
}

impl EngineConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> AgentosResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw).map_err(|e| {
            AgentosError::Config(format!("Failed to parse '{}': {e}", path.display()))
        })
    }

    /// Parse a TOML document.
    pub fn from_toml(raw: &str) -> AgentosResult<Self> {
        toml::from_str(raw).map_err(|e| AgentosError::Config(e.to_string()))
    }

    /// Render as pretty TOML.
    pub fn to_toml(&self) -> AgentosResult<String> {
        toml::to_string_pretty(self).map_err(|e| AgentosError::Config(e.to_string()))
    }

    /// Apply `AGENTOS_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Values that do not parse are ignored
    /// and the current setting is kept.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("AGENTOS_BUS_ENDPOINT").filter(|v| !v.is_empty()) {
            self.bus.endpoint = endpoint;
        }
        override_parsed(&lookup, "AGENTOS_PUBLISH_TIMEOUT_MS", &mut self.bus.publish_timeout_ms);
        override_parsed(&lookup, "AGENTOS_SLOTS", &mut self.scheduler.slots);
        override_parsed(&lookup, "AGENTOS_MAX_PENDING", &mut self.scheduler.max_pending);
        override_parsed(
            &lookup,
            "AGENTOS_MAX_ATTEMPTS",
            &mut self.orchestrator.retry.max_attempts,
        );
        override_parsed(
            &lookup,
            "AGENTOS_STEP_TIMEOUT_MS",
            &mut self.orchestrator.step_timeout_ms,
        );
        if let Some(level) = lookup("AGENTOS_LOG_LEVEL").filter(|v| !v.is_empty()) {
            self.log.level = level;
        }
        override_parsed(&lookup, "AGENTOS_LOG_JSON", &mut self.log.json);
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> AgentosResult<()> {
        if self.bus.endpoint.trim().is_empty() {
            return Err(AgentosError::Config("bus.endpoint must be set".to_string()));
        }
        if self.bus.publish_timeout_ms == 0 {
            return Err(AgentosError::Config(
                "bus.publish_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.bus.subscriber_buffer == 0 {
            return Err(AgentosError::Config(
                "bus.subscriber_buffer must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.slots == 0 {
            return Err(AgentosError::Config(
                "scheduler.slots must be at least 1".to_string(),
            ));
        }
        if self.scheduler.max_pending == 0 {
            return Err(AgentosError::Config(
                "scheduler.max_pending must be at least 1".to_string(),
            ));
        }
        self.orchestrator.validate()
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(key, value = %raw, "Ignoring unparseable environment override"),
    }
}
