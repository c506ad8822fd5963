//! Engine builder and runtime, the single entry point for running suites.
//!
//! The [`Engine`] wires the collaborators (device pool, stores, artifact
//! sink, video recorder) into an [`ExecutionCoordinator`]. Construct via
//! [`Engine::builder()`].
//!
//! ```rust,ignore
//! let engine = Engine::builder()
//!     .devices(pool)
//!     .scenario_store(scenarios)
//!     .artifact_sink(ReportFolderSink::new("./reports"))
//!     .build()?;
//!
//! let mut handle = engine.execute_suite("smoke").await?;
//! while let Ok(event) = handle.events.recv().await {
//!     if event.is_terminal() { break; }
//! }
//! ```

mod builder;
pub mod error;

pub use builder::EngineBuilder;
pub use error::EngineError;

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::events::SuiteEvent;
use crate::executor::{ExecutionCoordinator, PreparedRun, SuiteRunHandle, ValidationError};
use crate::registry::{RunRegistry, SuiteRunSnapshot};
use crate::traits::{ResultStore, SuiteStore};
use crate::types::{ExecutionRequest, SuiteExecutionResult};

/// Display name given to runs that do not come from a stored suite.
const ADHOC_SUITE_NAME: &str = "Ad-hoc run";

/// The assembled engine. Cheap to clone; all internals are `Arc`-wrapped.
#[derive(Clone)]
pub struct Engine {
    pub(super) coordinator: ExecutionCoordinator,
    pub(super) suite_store: Arc<dyn SuiteStore>,
    pub(super) result_store: Arc<dyn ResultStore>,
}

impl Engine {
    /// Create a new [`EngineBuilder`].
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Start a stored suite. Returns once the run is validated and
    /// spawned.
    pub async fn execute_suite(&self, suite_id: &str) -> Result<SuiteRunHandle, EngineError> {
        let prepared = self.prepare_suite(suite_id).await?;
        Ok(self.coordinator.start(prepared))
    }

    /// Start an ad-hoc request under a generated suite id.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<SuiteRunHandle, EngineError> {
        let prepared = self.prepare_adhoc(request).await?;
        Ok(self.coordinator.start(prepared))
    }

    /// Run a stored suite to completion.
    pub async fn run_suite(&self, suite_id: &str) -> Result<SuiteExecutionResult, EngineError> {
        let prepared = self.prepare_suite(suite_id).await?;
        Ok(self.coordinator.run(prepared).await?)
    }

    /// Run an ad-hoc request to completion.
    pub async fn run(&self, request: ExecutionRequest) -> Result<SuiteExecutionResult, EngineError> {
        let prepared = self.prepare_adhoc(request).await?;
        Ok(self.coordinator.run(prepared).await?)
    }

    /// Request a stop. Returns `false` when no such run is active.
    pub fn stop(&self, suite_run_id: &str) -> bool {
        let stopped = self.coordinator.registry().stop(suite_run_id);
        if stopped {
            tracing::info!(suite_run_id = %suite_run_id, "stop requested");
        }
        stopped
    }

    /// Live status of an active run.
    pub fn status(&self, suite_run_id: &str) -> Option<SuiteRunSnapshot> {
        self.coordinator.registry().snapshot(suite_run_id)
    }

    /// Every active run, oldest first.
    pub fn active_runs(&self) -> Vec<SuiteRunSnapshot> {
        self.coordinator.registry().active()
    }

    /// Events of every run started after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SuiteEvent> {
        self.coordinator.subscribe()
    }

    pub fn registry(&self) -> &RunRegistry {
        self.coordinator.registry()
    }

    pub fn results(&self) -> &Arc<dyn ResultStore> {
        &self.result_store
    }

    /// A persisted result, by suite run id.
    pub async fn get_result(
        &self,
        suite_run_id: &str,
    ) -> Result<Option<SuiteExecutionResult>, EngineError> {
        Ok(self.result_store.get_result(suite_run_id).await?)
    }

    /// Persisted results, newest first.
    pub async fn list_results(
        &self,
        suite_id: Option<&str>,
    ) -> Result<Vec<SuiteExecutionResult>, EngineError> {
        Ok(self.result_store.list_results(suite_id).await?)
    }

    async fn prepare_suite(&self, suite_id: &str) -> Result<PreparedRun, EngineError> {
        let suite = self
            .suite_store
            .get_suite(suite_id)
            .await
            .map_err(|source| EngineError::SuiteStore { source })?
            .ok_or_else(|| ValidationError::SuiteNotFound {
                id: suite_id.to_string(),
            })?;
        let request = ExecutionRequest::from_suite(&suite, "suite");
        Ok(self
            .coordinator
            .prepare(&suite.id, &suite.name, request)
            .await?)
    }

    async fn prepare_adhoc(&self, request: ExecutionRequest) -> Result<PreparedRun, EngineError> {
        let suite_id = format!("adhoc-{}", Uuid::new_v4());
        Ok(self
            .coordinator
            .prepare(&suite_id, ADHOC_SUITE_NAME, request)
            .await?)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}
