//! In-memory result store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::ResultStoreError;
use crate::traits::ResultStore;
use crate::types::SuiteExecutionResult;

/// In-memory implementation of [`ResultStore`]. Saving an existing id
/// replaces it.
#[derive(Clone, Default)]
pub struct InMemoryResultStore {
    results: Arc<RwLock<BTreeMap<String, SuiteExecutionResult>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous lookup, for tests and status pages.
    pub fn get(&self, id: &str) -> Option<SuiteExecutionResult> {
        self.results.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save_result(&self, result: &SuiteExecutionResult) -> Result<(), ResultStoreError> {
        self.results
            .write()
            .insert(result.id.clone(), result.clone());
        Ok(())
    }

    async fn get_result(&self, id: &str) -> Result<Option<SuiteExecutionResult>, ResultStoreError> {
        Ok(self.get(id))
    }

    async fn list_results(
        &self,
        suite_id: Option<&str>,
    ) -> Result<Vec<SuiteExecutionResult>, ResultStoreError> {
        let mut results: Vec<_> = self
            .results
            .read()
            .values()
            .filter(|r| suite_id.map_or(true, |id| r.suite_id == id))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(results)
    }
}
