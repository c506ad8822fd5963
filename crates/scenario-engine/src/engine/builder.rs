//! Engine builder: assembles the collaborators into a runnable engine.

use std::path::PathBuf;
use std::sync::Arc;

use super::error::EngineError;
use super::Engine;
use crate::config::EngineConfig;
use crate::defaults::{
    InMemoryResultStore, InMemoryScenarioStore, InMemorySuiteStore, NoopVideoRecorder,
    StaticDevicePool,
};
use crate::executor::ExecutionCoordinator;
use crate::registry::RunRegistry;
use crate::traits::{
    ArtifactSink, DevicePool, ResultStore, ScenarioStore, SuiteStore, VideoRecorder,
};

/// Builder for assembling the [`Engine`].
///
/// All collaborator fields are optional; defaults are applied during
/// [`build()`](EngineBuilder::build). Without an artifact sink no failure
/// screenshots are captured.
pub struct EngineBuilder {
    devices: Option<Arc<dyn DevicePool>>,
    scenario_store: Option<Arc<dyn ScenarioStore>>,
    suite_store: Option<Arc<dyn SuiteStore>>,
    result_store: Option<Arc<dyn ResultStore>>,
    artifact_sink: Option<Arc<dyn ArtifactSink>>,
    video_recorder: Option<Arc<dyn VideoRecorder>>,
    registry: Option<RunRegistry>,
    config: EngineConfig,
    config_file: Option<PathBuf>,
}

impl EngineBuilder {
    pub(super) fn new() -> Self {
        Self {
            devices: None,
            scenario_store: None,
            suite_store: None,
            result_store: None,
            artifact_sink: None,
            video_recorder: None,
            registry: None,
            config: EngineConfig::default(),
            config_file: None,
        }
    }

    /// Set the device pool. Default: an empty [`StaticDevicePool`].
    pub fn devices(mut self, pool: impl DevicePool + 'static) -> Self {
        self.devices = Some(Arc::new(pool));
        self
    }

    /// Set the scenario store. Default: [`InMemoryScenarioStore`].
    pub fn scenario_store(mut self, store: impl ScenarioStore + 'static) -> Self {
        self.scenario_store = Some(Arc::new(store));
        self
    }

    /// Set the suite store. Default: [`InMemorySuiteStore`].
    pub fn suite_store(mut self, store: impl SuiteStore + 'static) -> Self {
        self.suite_store = Some(Arc::new(store));
        self
    }

    /// Set the result store. Default: [`InMemoryResultStore`].
    pub fn result_store(mut self, store: impl ResultStore + 'static) -> Self {
        self.result_store = Some(Arc::new(store));
        self
    }

    /// Set the artifact sink for failure screenshots.
    pub fn artifact_sink(mut self, sink: impl ArtifactSink + 'static) -> Self {
        self.artifact_sink = Some(Arc::new(sink));
        self
    }

    /// Set the video recorder. Default: [`NoopVideoRecorder`].
    pub fn video_recorder(mut self, recorder: impl VideoRecorder + 'static) -> Self {
        self.video_recorder = Some(Arc::new(recorder));
        self
    }

    /// Share a run registry with another component, e.g. a status API.
    pub fn registry(mut self, registry: RunRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the engine configuration from a JSON file at build time.
    /// Overrides [`config`](Self::config).
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Assemble the engine, applying defaults for any unset collaborator.
    pub fn build(self) -> Result<Engine, EngineError> {
        let config = match &self.config_file {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => self.config,
        };
        if config.artifact_concurrency == 0 {
            return Err(EngineError::Build {
                message: "artifact_concurrency must be at least 1".into(),
            });
        }

        let devices: Arc<dyn DevicePool> = self
            .devices
            .unwrap_or_else(|| Arc::new(StaticDevicePool::new()));
        let scenario_store: Arc<dyn ScenarioStore> = self
            .scenario_store
            .unwrap_or_else(|| Arc::new(InMemoryScenarioStore::new()));
        let suite_store: Arc<dyn SuiteStore> = self
            .suite_store
            .unwrap_or_else(|| Arc::new(InMemorySuiteStore::new()));
        let result_store: Arc<dyn ResultStore> = self
            .result_store
            .unwrap_or_else(|| Arc::new(InMemoryResultStore::new()));
        let video: Arc<dyn VideoRecorder> = self
            .video_recorder
            .unwrap_or_else(|| Arc::new(NoopVideoRecorder));
        let registry = self.registry.unwrap_or_default();

        tracing::debug!(
            artifact_capture = self.artifact_sink.is_some(),
            max_node_visits = config.max_node_visits,
            "engine built"
        );

        let coordinator = ExecutionCoordinator::new(
            config,
            devices,
            scenario_store,
            Some(Arc::clone(&result_store)),
            self.artifact_sink,
            Some(video),
            registry,
        );

        Ok(Engine {
            coordinator,
            suite_store,
            result_store,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
