use crate::error::{AgentosError, AgentosResult};
use crate::task::AgentId;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Narrow contract to the external per-agent memory store.
///
/// Writes are assumed at-least-once by callers, so implementations should
/// treat a repeated write of the same value as harmless.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Read a value. `Ok(None)` means the key was not found.
    async fn read(&self, agent_id: &AgentId, key: &str) -> AgentosResult<Option<serde_json::Value>>;

    /// Write (insert or overwrite) a value.
    async fn write(&self, agent_id: &AgentId, key: &str, value: serde_json::Value)
        -> AgentosResult<()>;
}

/// In-memory store keyed by `(agent id, key)`.
/// Suitable for single-process deployments and tests.
pub struct InMemoryMemoryStore {
    entries: RwLock<HashMap<(AgentId, String), serde_json::Value>>,
}

impl InMemoryMemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored entries across all agents.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no value is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn read(&self, agent_id: &AgentId, key: &str) -> AgentosResult<Option<serde_json::Value>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&(agent_id.clone(), key.to_string())).cloned())
    }

    async fn write(
        &self,
        agent_id: &AgentId,
        key: &str,
        value: serde_json::Value,
    ) -> AgentosResult<()> {
        if key.is_empty() {
            return Err(AgentosError::Execution("Empty memory key".to_string()));
        }
        let mut entries = self.entries.write().await;
        entries.insert((agent_id.clone(), key.to_string()), value);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let store = InMemoryMemoryStore::new();
        let value = store.read(&AgentId::new("a"), "nope").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let store = InMemoryMemoryStore::new();
        let agent = AgentId::new("a");
        store.write(&agent, "k", json!({"v": 1})).await.unwrap();
        store.write(&agent, "k", json!({"v": 1})).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.read(&agent, "k").await.unwrap(), Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn test_agents_are_isolated() {
        let store = InMemoryMemoryStore::new();
        store
            .write(&AgentId::new("a"), "k", json!("a-value"))
            .await
            .unwrap();
        let other = store.read(&AgentId::new("b"), "k").await.unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let store = InMemoryMemoryStore::new();
        let err = store
            .write(&AgentId::new("a"), "", json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentosError::Execution(_)));
    }
}
