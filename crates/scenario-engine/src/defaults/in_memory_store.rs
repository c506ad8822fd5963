//! In-memory scenario and suite stores for testing and embedding.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::StoreError;
use crate::traits::{ScenarioStore, SuiteStore};
use crate::types::{ScenarioGraph, Suite};

/// In-memory implementation of [`ScenarioStore`].
#[derive(Clone, Default)]
pub struct InMemoryScenarioStore {
    graphs: Arc<RwLock<BTreeMap<String, ScenarioGraph>>>,
}

impl InMemoryScenarioStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a graph, keyed by its id.
    pub fn insert(&self, graph: ScenarioGraph) {
        self.graphs.write().insert(graph.id.clone(), graph);
    }

    pub fn remove(&self, id: &str) -> Option<ScenarioGraph> {
        self.graphs.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.graphs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.read().is_empty()
    }
}

impl FromIterator<ScenarioGraph> for InMemoryScenarioStore {
    fn from_iter<I: IntoIterator<Item = ScenarioGraph>>(iter: I) -> Self {
        let store = Self::new();
        for graph in iter {
            store.insert(graph);
        }
        store
    }
}

#[async_trait]
impl ScenarioStore for InMemoryScenarioStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<ScenarioGraph>, StoreError> {
        Ok(self.graphs.read().get(id).cloned())
    }
}

/// In-memory implementation of [`SuiteStore`].
#[derive(Clone, Default)]
pub struct InMemorySuiteStore {
    suites: Arc<RwLock<BTreeMap<String, Suite>>>,
}

impl InMemorySuiteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, suite: Suite) {
        self.suites.write().insert(suite.id.clone(), suite);
    }

    pub fn remove(&self, id: &str) -> Option<Suite> {
        self.suites.write().remove(id)
    }
}

#[async_trait]
impl SuiteStore for InMemorySuiteStore {
    async fn get_suite(&self, id: &str) -> Result<Option<Suite>, StoreError> {
        Ok(self.suites.read().get(id).cloned())
    }
}
