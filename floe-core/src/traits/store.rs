//! ABOUTME: BlueprintStore capability and in-memory reference implementation
//! ABOUTME: Content-addressed storage; identical content yields identical ids

use crate::blueprint::Blueprint;
use crate::error::{FloeError, Result};
use crate::types::BlueprintId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Optional persistence seam for blueprints.
#[async_trait]
pub trait BlueprintStore: Send + Sync {
    /// Store a blueprint; returns its content-addressed id.
    async fn put(&self, blueprint: Blueprint) -> Result<BlueprintId>;

    async fn get(&self, id: &BlueprintId) -> Result<Blueprint>;

    async fn list(&self) -> Result<Vec<BlueprintId>>;
}

/// In-memory store used by tests and single-process hosts.
#[derive(Debug, Default)]
pub struct MemoryBlueprintStore {
    inner: RwLock<HashMap<BlueprintId, Blueprint>>,
}

impl MemoryBlueprintStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlueprintStore for MemoryBlueprintStore {
    async fn put(&self, blueprint: Blueprint) -> Result<BlueprintId> {
        let id = blueprint.id();
        self.inner.write().insert(id.clone(), blueprint);
        Ok(id)
    }

    async fn get(&self, id: &BlueprintId) -> Result<Blueprint> {
        self.inner.read().get(id).cloned().ok_or_else(|| FloeError::Internal {
            message: format!("blueprint {id} not in store"),
        })
    }

    async fn list(&self) -> Result<Vec<BlueprintId>> {
        let mut ids: Vec<BlueprintId> = self.inner.read().keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{NodePayload, NodeSpec, ToolSpec};
    use serde_json::Map;

    fn sample(id: &str) -> Blueprint {
        Blueprint::new(vec![NodeSpec::new(
            id,
            NodePayload::Tool(ToolSpec {
                tool_name: "echo".to_string(),
                tool_args: Map::new(),
            }),
        )])
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryBlueprintStore::new();
        let blueprint = sample("n1");
        let id = store.put(blueprint.clone()).await.unwrap();
        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched, blueprint);
    }

    #[tokio::test]
    async fn test_identical_content_identical_id() {
        let store = MemoryBlueprintStore::new();
        let a = store.put(sample("n1")).await.unwrap();
        let b = store.put(sample("n1")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_id_errors() {
        let store = MemoryBlueprintStore::new();
        let id = BlueprintId::from_content(b"nothing here");
        assert!(store.get(&id).await.is_err());
    }
}
