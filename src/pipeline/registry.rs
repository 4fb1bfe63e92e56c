/// Hot-reload pipeline registry using ArcSwap
///
/// Holds a validated `Graph` per pipeline id. Every update clones the map and swaps
/// the whole pointer, so runs already holding an `Arc<Graph>` keep their snapshot
/// while new runs see the new definition.

use crate::pipeline::graph::Graph;
use crate::pipeline::storage::PipelineStore;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

pub struct PipelineRegistry {
    /// pipeline_id -> validated graph
    graphs: ArcSwap<HashMap<String, Arc<Graph>>>,
    store: Arc<dyn PipelineStore>,
}

impl PipelineRegistry {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self {
            graphs: ArcSwap::new(Arc::new(HashMap::new())),
            store,
        }
    }

    /// Load every stored pipeline; definitions that fail validation are skipped
    pub async fn init_from_store(&self) -> Result<()> {
        let mut graphs = HashMap::new();
        for pipeline in self.store.list_all().await? {
            match Graph::from_pipeline(&pipeline) {
                Ok(graph) => {
                    graphs.insert(pipeline.id.clone(), Arc::new(graph));
                }
                Err(e) => {
                    tracing::warn!("⚠️ Skipping invalid pipeline '{}': {}", pipeline.id, e);
                }
            }
        }

        self.graphs.store(Arc::new(graphs));
        tracing::info!(
            "📊 Initialized pipeline registry with {} pipelines",
            self.graphs.load().len()
        );
        Ok(())
    }

    /// Re-read one pipeline from the store and swap in its graph
    pub async fn reload(&self, pipeline_id: &str) -> Result<Arc<Graph>> {
        let pipeline = self
            .store
            .load(pipeline_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Pipeline not found: {}", pipeline_id))?;
        let graph = Arc::new(Graph::from_pipeline(&pipeline)?);

        let mut next = (**self.graphs.load()).clone();
        next.insert(pipeline_id.to_string(), Arc::clone(&graph));
        self.graphs.store(Arc::new(next));

        tracing::info!("🔥 Hot-reloaded pipeline: {}", pipeline_id);
        Ok(graph)
    }

    pub fn get(&self, pipeline_id: &str) -> Option<Arc<Graph>> {
        self.graphs.load().get(pipeline_id).cloned()
    }

    pub fn remove(&self, pipeline_id: &str) {
        let current = self.graphs.load();
        if !current.contains_key(pipeline_id) {
            return;
        }
        let mut next = (**current).clone();
        next.remove(pipeline_id);
        self.graphs.store(Arc::new(next));
        tracing::info!("Removed pipeline from registry: {}", pipeline_id);
    }

    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.graphs.load().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{EdgeSpec, LoopConfig, NodeConfig, NodeSpec, Pipeline};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        pipelines: Mutex<HashMap<String, Pipeline>>,
    }

    #[async_trait]
    impl PipelineStore for MemoryStore {
        async fn load(&self, id: &str) -> Result<Option<Pipeline>> {
            Ok(self.pipelines.lock().get(id).cloned())
        }
        async fn save(&self, pipeline: &Pipeline) -> Result<()> {
            self.pipelines
                .lock()
                .insert(pipeline.id.clone(), pipeline.clone());
            Ok(())
        }
        async fn delete(&self, id: &str) -> Result<bool> {
            Ok(self.pipelines.lock().remove(id).is_some())
        }
        async fn list_all(&self) -> Result<Vec<Pipeline>> {
            Ok(self.pipelines.lock().values().cloned().collect())
        }
    }

    fn looped(id: &str, edges: Vec<EdgeSpec>) -> Pipeline {
        Pipeline {
            id: id.into(),
            name: id.into(),
            nodes: vec![
                NodeSpec::new("a", NodeConfig::Loop(LoopConfig::default())),
                NodeSpec::new("b", NodeConfig::Loop(LoopConfig::default())),
            ],
            edges,
        }
    }

    #[tokio::test]
    async fn invalid_definitions_are_skipped_at_startup() {
        let store = Arc::new(MemoryStore::default());
        store
            .save(&looped("ok", vec![EdgeSpec::new("a", "b")]))
            .await
            .unwrap();
        store
            .save(&looped(
                "cyclic",
                vec![EdgeSpec::new("a", "b"), EdgeSpec::new("b", "a")],
            ))
            .await
            .unwrap();

        let registry = PipelineRegistry::new(store);
        registry.init_from_store().await.unwrap();
        assert_eq!(registry.list_ids(), vec!["ok".to_string()]);
    }

    #[tokio::test]
    async fn reload_swaps_without_touching_held_snapshots() {
        let store = Arc::new(MemoryStore::default());
        store.save(&looped("p", vec![])).await.unwrap();
        let registry = PipelineRegistry::new(store.clone());
        let before = registry.reload("p").await.unwrap();

        store
            .save(&looped("p", vec![EdgeSpec::new("a", "b")]))
            .await
            .unwrap();
        let after = registry.reload("p").await.unwrap();

        assert!(before.edges().is_empty());
        assert_eq!(after.edges().len(), 1);
        assert_eq!(registry.get("p").unwrap().edges().len(), 1);

        registry.remove("p");
        assert!(registry.get("p").is_none());
    }
}
