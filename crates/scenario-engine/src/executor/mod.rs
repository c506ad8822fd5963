//! Suite executor: Suite → Device (parallel) → Repeat → Scenario.
//!
//! A run is validated up front, registered in the [`RunRegistry`], and then
//! fanned out as one tokio task per device. Within a device every scenario
//! slot runs sequentially; across devices nothing is ordered. The run
//! always settles into a [`SuiteExecutionResult`], stopped or not.

mod device;
mod dispatch;
mod navigator;
mod run;
mod step;

pub use dispatch::ActionContext;
pub use navigator::GraphNavigator;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::artifacts::ArtifactQueue;
use crate::config::EngineConfig;
use crate::errors::StoreError;
use crate::events::SuiteEvent;
use crate::registry::{RunRegistry, SuiteExecutionState, SuiteRunSnapshot};
use crate::traits::{
    ArtifactSink, DeviceActionProvider, DevicePool, ResultStore, ScenarioStore, VideoRecorder,
};
use crate::types::*;

use dispatch::ActionDispatcher;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A request that cannot start. Raised before any device task exists.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("suite not found: {id}")]
    SuiteNotFound { id: String },
    #[error("device not found: {id}")]
    DeviceNotFound { id: String },
    #[error("scenario not found: {id}")]
    ScenarioNotFound { id: String },
    #[error("no devices requested")]
    EmptyDevices,
    #[error("no scenarios requested")]
    EmptyScenarios,
    #[error("repeat count must be at least 1, got {count}")]
    InvalidRepeatCount { count: u32 },
    #[error("scenario {scenario_id} has no start node")]
    MissingStartNode { scenario_id: String },
}

/// Errors from the executor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("scenario store error: {0}")]
    ScenarioStore(#[from] StoreError),
    /// The run task itself died. Device failures never surface here.
    #[error("suite run task failed: {message}")]
    Join { message: String },
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// A validated run, ready to start.
pub struct PreparedRun {
    state: Arc<SuiteExecutionState>,
    scenarios: Arc<Vec<ScenarioGraph>>,
    devices: Vec<(String, Arc<dyn DeviceActionProvider>)>,
}

impl PreparedRun {
    pub fn suite_run_id(&self) -> &str {
        &self.state.suite_run_id
    }
}

impl std::fmt::Debug for PreparedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedRun")
            .field("suite_run_id", &self.state.suite_run_id)
            .field("scenarios", &self.scenarios.len())
            .field("devices", &self.devices.len())
            .finish()
    }
}

/// Handle to a running suite.
pub struct SuiteRunHandle {
    pub suite_run_id: String,
    /// Subscribed before the run started, so no event of this run is
    /// missed. Carries every run's events; filter by
    /// [`SuiteEvent::suite_run_id`].
    pub events: broadcast::Receiver<SuiteEvent>,
    state: Arc<SuiteExecutionState>,
    join: JoinHandle<SuiteExecutionResult>,
}

impl SuiteRunHandle {
    /// Raise the run's stop flag.
    pub fn stop(&self) {
        self.state.request_stop();
    }

    pub fn snapshot(&self) -> SuiteRunSnapshot {
        self.state.snapshot()
    }

    /// Wait for the run to settle.
    pub async fn wait(self) -> Result<SuiteExecutionResult, ExecutorError> {
        self.join.await.map_err(|e| ExecutorError::Join {
            message: e.to_string(),
        })
    }
}

impl std::fmt::Debug for SuiteRunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiteRunHandle")
            .field("suite_run_id", &self.suite_run_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Validates requests and drives suite runs. Cheap to clone.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    config: Arc<EngineConfig>,
    devices: Arc<dyn DevicePool>,
    scenarios: Arc<dyn ScenarioStore>,
    results: Option<Arc<dyn ResultStore>>,
    artifact_sink: Option<Arc<dyn ArtifactSink>>,
    video: Option<Arc<dyn VideoRecorder>>,
    dispatcher: ActionDispatcher,
    registry: RunRegistry,
    events: broadcast::Sender<SuiteEvent>,
}

impl ExecutionCoordinator {
    pub(crate) fn new(
        config: EngineConfig,
        devices: Arc<dyn DevicePool>,
        scenarios: Arc<dyn ScenarioStore>,
        results: Option<Arc<dyn ResultStore>>,
        artifact_sink: Option<Arc<dyn ArtifactSink>>,
        video: Option<Arc<dyn VideoRecorder>>,
        registry: RunRegistry,
    ) -> Self {
        let config = Arc::new(config);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let artifacts = artifact_sink
            .as_ref()
            .map(|sink| ArtifactQueue::new(Arc::clone(sink), config.artifact_concurrency));
        Self {
            dispatcher: ActionDispatcher::new(Arc::clone(&config), artifacts),
            config,
            devices,
            scenarios,
            results,
            artifact_sink,
            video,
            registry,
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Subscribe to the events of every run started after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SuiteEvent> {
        self.events.subscribe()
    }

    /// Validate `request` and resolve its devices and scenarios.
    ///
    /// Checks run in order: non-empty device and scenario lists, repeat
    /// count, every device resolvable, every scenario loadable with a
    /// start node.
    pub async fn prepare(
        &self,
        suite_id: &str,
        suite_name: &str,
        request: ExecutionRequest,
    ) -> Result<PreparedRun, ExecutorError> {
        if request.device_ids.is_empty() {
            return Err(ValidationError::EmptyDevices.into());
        }
        if request.scenario_ids.is_empty() {
            return Err(ValidationError::EmptyScenarios.into());
        }
        if request.repeat_count == 0 {
            return Err(ValidationError::InvalidRepeatCount {
                count: request.repeat_count,
            }
            .into());
        }

        let mut devices = Vec::with_capacity(request.device_ids.len());
        for id in &request.device_ids {
            let device = self
                .devices
                .actions(id)
                .ok_or_else(|| ValidationError::DeviceNotFound { id: id.clone() })?;
            devices.push((id.clone(), device));
        }

        let mut scenarios = Vec::with_capacity(request.scenario_ids.len());
        for id in &request.scenario_ids {
            let graph = self
                .scenarios
                .get_by_id(id)
                .await?
                .ok_or_else(|| ValidationError::ScenarioNotFound { id: id.clone() })?;
            if graph.start_node().is_none() {
                return Err(ValidationError::MissingStartNode {
                    scenario_id: id.clone(),
                }
                .into());
            }
            scenarios.push(graph);
        }

        let suite_run_id = Uuid::new_v4().to_string();
        let state = SuiteExecutionState::new(suite_run_id, suite_id, suite_name, request);
        Ok(PreparedRun {
            state: Arc::new(state),
            scenarios: Arc::new(scenarios),
            devices,
        })
    }

    /// Register and spawn a prepared run. Returns immediately.
    pub fn start(&self, run: PreparedRun) -> SuiteRunHandle {
        let events = self.events.subscribe();
        let state = Arc::clone(&run.state);
        self.registry.insert(Arc::clone(&state));
        let coordinator = self.clone();
        let join = tokio::spawn(run::execute_run(coordinator, run));
        SuiteRunHandle {
            suite_run_id: state.suite_run_id.clone(),
            events,
            state,
            join,
        }
    }

    /// Start a prepared run and wait for it to settle.
    ///
    /// The run lives on its own task, so dropping this future does not
    /// abandon it: the run still finishes, persists its result and leaves
    /// the registry.
    pub async fn run(&self, run: PreparedRun) -> Result<SuiteExecutionResult, ExecutorError> {
        self.start(run).wait().await
    }

    fn emit(&self, event: SuiteEvent) {
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("config", &self.config)
            .field("active_runs", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::time::Instant;

    use crate::defaults::{
        InMemoryArtifactSink, InMemoryResultStore, InMemoryScenarioStore, StaticDevicePool,
    };
    use crate::registry::DeviceRunStatus;
    use crate::testing::{linear_graph, GraphBuilder, ScriptedDevice};

    struct Fixture {
        coordinator: ExecutionCoordinator,
        results: Arc<InMemoryResultStore>,
    }

    fn fixture(devices: Vec<Arc<ScriptedDevice>>, graphs: Vec<ScenarioGraph>) -> Fixture {
        fixture_with(devices, graphs, None, None)
    }

    fn fixture_with(
        devices: Vec<Arc<ScriptedDevice>>,
        graphs: Vec<ScenarioGraph>,
        artifact_sink: Option<Arc<dyn ArtifactSink>>,
        video: Option<Arc<dyn VideoRecorder>>,
    ) -> Fixture {
        let pool = StaticDevicePool::new();
        for d in devices {
            pool.insert(d);
        }
        let store = InMemoryScenarioStore::new();
        for g in graphs {
            store.insert(g);
        }
        let results = Arc::new(InMemoryResultStore::new());
        let config = EngineConfig {
            retry: RetryPolicy::new(2, 100),
            ..EngineConfig::default()
        };
        let coordinator = ExecutionCoordinator::new(
            config,
            Arc::new(pool),
            Arc::new(store),
            Some(results.clone() as Arc<dyn ResultStore>),
            artifact_sink,
            video,
            RunRegistry::new(),
        );
        Fixture {
            coordinator,
            results,
        }
    }

    fn tap_scenario(id: &str) -> ScenarioGraph {
        linear_graph(id, &[json!({"actionType": "tap", "x": 1, "y": 1})])
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    /// Logs every start and stop along with how many taps the device had
    /// made at that moment.
    struct ScriptedRecorder {
        device: Arc<ScriptedDevice>,
        fail_start: bool,
        fail_stop: bool,
        log: Mutex<Vec<(String, usize)>>,
    }

    impl ScriptedRecorder {
        fn new(device: Arc<ScriptedDevice>) -> Self {
            Self {
                device,
                fail_start: false,
                fail_stop: false,
                log: Mutex::new(Vec::new()),
            }
        }

        fn slot(ctx: &CorrelationContext) -> String {
            format!(
                "{}#{}",
                ctx.scenario_id.as_deref().unwrap_or("-"),
                ctx.repeat.unwrap_or(0)
            )
        }

        fn log(&self) -> Vec<(String, usize)> {
            self.log.lock().clone()
        }
    }

    #[async_trait]
    impl VideoRecorder for ScriptedRecorder {
        async fn start(&self, ctx: &CorrelationContext) -> VideoOutcome {
            let taps = self.device.call_count("tap");
            self.log.lock().push((format!("start {}", Self::slot(ctx)), taps));
            if self.fail_start {
                VideoOutcome::failed("no encoder")
            } else {
                VideoOutcome::started()
            }
        }

        async fn stop(&self, ctx: &CorrelationContext) -> VideoOutcome {
            let taps = self.device.call_count("tap");
            self.log.lock().push((format!("stop {}", Self::slot(ctx)), taps));
            if self.fail_stop {
                VideoOutcome::failed("disk full")
            } else {
                VideoOutcome::saved(format!("videos/{}.mp4", Self::slot(ctx)))
            }
        }
    }

    #[tokio::test]
    async fn validation_rejects_before_any_device_call() {
        let device = Arc::new(ScriptedDevice::new("d1"));
        let f = fixture(vec![device.clone()], vec![tap_scenario("s1")]);
        let c = &f.coordinator;

        let cases = [
            (ExecutionRequest::new(vec![], ids(&["s1"])), ValidationError::EmptyDevices),
            (ExecutionRequest::new(ids(&["d1"]), vec![]), ValidationError::EmptyScenarios),
            (
                ExecutionRequest::new(ids(&["d1"]), ids(&["s1"])).repeat_count(0),
                ValidationError::InvalidRepeatCount { count: 0 },
            ),
            (
                ExecutionRequest::new(ids(&["d1", "ghost"]), ids(&["s1"])),
                ValidationError::DeviceNotFound { id: "ghost".into() },
            ),
            (
                ExecutionRequest::new(ids(&["d1"]), ids(&["s1", "missing"])),
                ValidationError::ScenarioNotFound {
                    id: "missing".into(),
                },
            ),
        ];
        for (request, expected) in cases {
            match c.prepare("suite", "Suite", request).await {
                Err(ExecutorError::Validation(e)) => assert_eq!(e, expected),
                other => panic!("expected {expected:?}, got {other:?}"),
            }
        }
        assert!(device.calls().is_empty());
        assert!(c.registry().is_empty());
    }

    #[tokio::test]
    async fn validation_rejects_graph_without_start() {
        let mut graph = tap_scenario("s1");
        graph.nodes.retain(|n| n.kind != NodeKind::Start);
        let f = fixture(vec![Arc::new(ScriptedDevice::new("d1"))], vec![graph]);

        let err = f
            .coordinator
            .prepare("suite", "Suite", ExecutionRequest::new(ids(&["d1"]), ids(&["s1"])))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecutorError::Validation(ValidationError::MissingStartNode { .. })
        ));
    }

    #[tokio::test]
    async fn runs_every_slot_and_aggregates() {
        let d1 = Arc::new(ScriptedDevice::new("d1"));
        let d2 = Arc::new(ScriptedDevice::new("d2"));
        let f = fixture(
            vec![d1.clone(), d2.clone()],
            vec![tap_scenario("s1"), tap_scenario("s2")],
        );
        let request = ExecutionRequest::new(ids(&["d1", "d2"]), ids(&["s1", "s2"])).repeat_count(2);

        let prepared = f.coordinator.prepare("suite", "Suite", request).await.unwrap();
        let result = f.coordinator.run(prepared).await.unwrap();

        assert_eq!(result.status, SuiteRunStatus::Completed);
        assert_eq!(result.device_results.len(), 2);
        assert_eq!(result.stats.total_scenarios, 2);
        assert_eq!(result.stats.total_devices, 2);
        assert_eq!(result.stats.total_executions, 8);
        assert_eq!(result.stats.passed, 8);
        for device in &result.device_results {
            let order: Vec<_> = device
                .scenario_results
                .iter()
                .map(|s| (s.scenario_id.as_str(), s.repeat))
                .collect();
            assert_eq!(order, [("s1", 1), ("s2", 1), ("s1", 2), ("s2", 2)]);
            assert!(device.environment.is_some());
        }
        assert_eq!(d1.call_count("tap"), 4);
        assert!(f.coordinator.registry().is_empty());
        assert!(f.results.get(&result.id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_runs_between_slots_only() {
        let device = Arc::new(ScriptedDevice::new("d1"));
        let f = fixture(vec![device], vec![tap_scenario("s1"), tap_scenario("s2")]);
        let request = ExecutionRequest::new(ids(&["d1"]), ids(&["s1", "s2"]))
            .repeat_count(2)
            .scenario_interval(500);
        let mut events = f.coordinator.subscribe();

        let started = Instant::now();
        let prepared = f.coordinator.prepare("suite", "Suite", request).await.unwrap();
        let result = f.coordinator.run(prepared).await.unwrap();
        let elapsed = started.elapsed();

        // 4 slots, 3 gaps of 500ms; nothing after the last slot.
        assert_eq!(result.stats.passed, 4);
        assert!(elapsed >= Duration::from_millis(1500), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(2000), "{elapsed:?}");

        let mut completes = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if let SuiteEvent::ScenarioComplete { result, .. } = ev {
                completes.push(result.completed_at);
            }
        }
        assert_eq!(completes.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_mid_run_skips_remaining_slots() {
        let device = Arc::new(ScriptedDevice::new("d1").with_latency(Duration::from_millis(100)));
        let graph = linear_graph(
            "s1",
            &[
                json!({"actionType": "tap", "x": 1, "y": 1}),
                json!({"actionType": "tap", "x": 2, "y": 2}),
                json!({"actionType": "tap", "x": 3, "y": 3}),
            ],
        );
        let f = fixture(vec![device.clone()], vec![graph, tap_scenario("s2")]);
        let request = ExecutionRequest::new(ids(&["d1"]), ids(&["s1", "s2"])).repeat_count(3);

        let prepared = f.coordinator.prepare("suite", "Suite", request).await.unwrap();
        let mut handle = f.coordinator.start(prepared);
        loop {
            match handle.events.recv().await.unwrap() {
                SuiteEvent::StepStart { .. } => break,
                _ => continue,
            }
        }
        handle.stop();
        let result = handle.wait().await.unwrap();

        assert_eq!(result.status, SuiteRunStatus::Stopped);
        let device_result = &result.device_results[0];
        assert_eq!(device_result.stats.total, 6);
        assert_eq!(device_result.stats.skipped, 5);
        let first = &device_result.scenario_results[0];
        assert_eq!(first.status, ScenarioStatus::Failed);
        // The step in flight finished and was recorded; nothing after it ran.
        assert_eq!(first.step_results.len(), 1);
        assert_eq!(first.step_results[0].status, StepStatus::Passed);
        assert_eq!(device.call_count("tap"), 1);
        assert!(device_result.scenario_results[1..]
            .iter()
            .all(|s| s.status == ScenarioStatus::Skipped));
    }

    #[tokio::test]
    async fn device_failure_is_isolated() {
        let healthy = Arc::new(ScriptedDevice::new("healthy"));
        let broken_env = Arc::new(ScriptedDevice::new("no-env"));
        broken_env.fail_environment("device offline");
        let panicking = Arc::new(ScriptedDevice::new("panics"));
        panicking.panic_on("tap");
        let f = fixture(
            vec![healthy.clone(), broken_env, panicking],
            vec![tap_scenario("s1")],
        );
        let request = ExecutionRequest::new(ids(&["healthy", "no-env", "panics"]), ids(&["s1"]));

        let prepared = f.coordinator.prepare("suite", "Suite", request).await.unwrap();
        let run_id = prepared.suite_run_id().to_string();
        let state = Arc::clone(&prepared.state);
        let result = f.coordinator.run(prepared).await.unwrap();

        assert_eq!(result.status, SuiteRunStatus::Completed);
        assert_eq!(result.device_results.len(), 1);
        assert_eq!(result.device_results[0].device_id, "healthy");
        assert_eq!(result.device_results[0].stats.passed, 1);
        assert_eq!(result.stats.total_devices, 3);
        assert_eq!(result.id, run_id);
        assert_eq!(
            state.device("no-env").unwrap().status,
            DeviceRunStatus::PartiallyFailed
        );
        assert_eq!(
            state.device("panics").unwrap().status,
            DeviceRunStatus::PartiallyFailed
        );
    }

    #[tokio::test]
    async fn failing_scenario_does_not_stop_next_one() {
        let device = Arc::new(ScriptedDevice::new("d1"));
        let bad = linear_graph("bad", &[json!({"actionType": "fly"})]);
        let f = fixture(vec![device.clone()], vec![bad, tap_scenario("good")]);
        let request = ExecutionRequest::new(ids(&["d1"]), ids(&["bad", "good"]));

        let prepared = f.coordinator.prepare("suite", "Suite", request).await.unwrap();
        let result = f.coordinator.run(prepared).await.unwrap();

        let stats = result.device_results[0].stats;
        assert_eq!((stats.total, stats.passed, stats.failed), (2, 1, 1));
        assert_eq!(result.status, SuiteRunStatus::Completed);
    }

    #[tokio::test]
    async fn events_follow_run_lifecycle() {
        let device = Arc::new(ScriptedDevice::new("d1"));
        let graph = GraphBuilder::new("s1")
            .action("w", json!({"actionType": "waitUntilExists", "selector": {"value": "ok"}}))
            .end("end")
            .edge("start", "w")
            .edge("w", "end")
            .build();
        device.appear_after("ok", 1);
        let f = fixture(vec![device], vec![graph]);
        let request = ExecutionRequest::new(ids(&["d1"]), ids(&["s1"]));
        let mut events = f.coordinator.subscribe();

        let prepared = f.coordinator.prepare("suite", "Suite", request).await.unwrap();
        f.coordinator.run(prepared).await.unwrap();

        let mut topics = Vec::new();
        while let Ok(ev) = events.try_recv() {
            topics.push(ev.topic());
        }
        assert_eq!(
            topics,
            [
                "suite:start",
                "suite:device:start",
                "suite:scenario:start",
                "suite:progress",
                "suite:step:start",
                "suite:step:waiting",
                "suite:step:complete",
                "suite:scenario:complete",
                "suite:device:complete",
                "suite:complete",
            ]
        );
    }

    #[tokio::test]
    async fn progress_counts_completed_units() {
        let device = Arc::new(ScriptedDevice::new("d1"));
        let f = fixture(vec![device], vec![tap_scenario("s1"), tap_scenario("s2")]);
        let request = ExecutionRequest::new(ids(&["d1"]), ids(&["s1", "s2"]));
        let mut events = f.coordinator.subscribe();

        let prepared = f.coordinator.prepare("suite", "Suite", request).await.unwrap();
        f.coordinator.run(prepared).await.unwrap();

        let mut progress = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if let SuiteEvent::Progress(p) = ev {
                progress.push((p.scenario_progress.current, p.overall_progress));
            }
        }
        assert_eq!(progress, [(1, 0.0), (2, 50.0)]);
    }

    #[tokio::test]
    async fn video_brackets_each_slot() {
        let device = Arc::new(ScriptedDevice::new("d1"));
        let recorder = Arc::new(ScriptedRecorder::new(device.clone()));
        let f = fixture_with(
            vec![device],
            vec![tap_scenario("s1"), tap_scenario("s2")],
            None,
            Some(recorder.clone() as Arc<dyn VideoRecorder>),
        );
        let request = ExecutionRequest::new(ids(&["d1"]), ids(&["s1", "s2"])).record_video(true);

        let prepared = f.coordinator.prepare("suite", "Suite", request).await.unwrap();
        let result = f.coordinator.run(prepared).await.unwrap();

        assert_eq!(
            recorder.log(),
            [
                ("start s1#1".to_string(), 0),
                ("stop s1#1".to_string(), 1),
                ("start s2#1".to_string(), 1),
                ("stop s2#1".to_string(), 2),
            ]
        );
        let paths: Vec<_> = result.device_results[0]
            .scenario_results
            .iter()
            .map(|s| s.video_path.as_deref())
            .collect();
        assert_eq!(paths, [Some("videos/s1#1.mp4"), Some("videos/s2#1.mp4")]);
    }

    #[tokio::test]
    async fn video_is_off_unless_requested() {
        let device = Arc::new(ScriptedDevice::new("d1"));
        let recorder = Arc::new(ScriptedRecorder::new(device.clone()));
        let f = fixture_with(
            vec![device],
            vec![tap_scenario("s1")],
            None,
            Some(recorder.clone() as Arc<dyn VideoRecorder>),
        );
        let request = ExecutionRequest::new(ids(&["d1"]), ids(&["s1"]));

        let prepared = f.coordinator.prepare("suite", "Suite", request).await.unwrap();
        let result = f.coordinator.run(prepared).await.unwrap();

        assert!(recorder.log().is_empty());
        assert_eq!(result.device_results[0].scenario_results[0].video_path, None);
    }

    #[tokio::test]
    async fn failed_video_start_skips_stop_and_keeps_scenario() {
        let device = Arc::new(ScriptedDevice::new("d1"));
        let recorder = Arc::new(ScriptedRecorder {
            fail_start: true,
            ..ScriptedRecorder::new(device.clone())
        });
        let f = fixture_with(
            vec![device],
            vec![tap_scenario("s1")],
            None,
            Some(recorder.clone() as Arc<dyn VideoRecorder>),
        );
        let request = ExecutionRequest::new(ids(&["d1"]), ids(&["s1"])).record_video(true);

        let prepared = f.coordinator.prepare("suite", "Suite", request).await.unwrap();
        let result = f.coordinator.run(prepared).await.unwrap();

        assert_eq!(recorder.log(), [("start s1#1".to_string(), 0)]);
        let scenario = &result.device_results[0].scenario_results[0];
        assert_eq!(scenario.status, ScenarioStatus::Passed);
        assert_eq!(scenario.video_path, None);
    }

    #[tokio::test]
    async fn failed_video_stop_leaves_no_path() {
        let device = Arc::new(ScriptedDevice::new("d1"));
        let recorder = Arc::new(ScriptedRecorder {
            fail_stop: true,
            ..ScriptedRecorder::new(device.clone())
        });
        let f = fixture_with(
            vec![device],
            vec![tap_scenario("s1")],
            None,
            Some(recorder.clone() as Arc<dyn VideoRecorder>),
        );
        let request = ExecutionRequest::new(ids(&["d1"]), ids(&["s1"])).record_video(true);

        let prepared = f.coordinator.prepare("suite", "Suite", request).await.unwrap();
        let result = f.coordinator.run(prepared).await.unwrap();

        assert_eq!(recorder.log().len(), 2);
        let scenario = &result.device_results[0].scenario_results[0];
        assert_eq!(scenario.status, ScenarioStatus::Passed);
        assert_eq!(scenario.video_path, None);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_device_unregisters_artifact_context() {
        let healthy = Arc::new(ScriptedDevice::new("healthy"));
        let panicking =
            Arc::new(ScriptedDevice::new("panics").with_latency(Duration::from_millis(100)));
        panicking.panic_on("tap");
        let sink = InMemoryArtifactSink::new();
        let f = fixture_with(
            vec![healthy, panicking],
            vec![tap_scenario("s1")],
            Some(Arc::new(sink.clone()) as Arc<dyn ArtifactSink>),
            None,
        );
        let request = ExecutionRequest::new(ids(&["healthy", "panics"]), ids(&["s1"]));

        let prepared = f.coordinator.prepare("suite", "Suite", request).await.unwrap();
        let mut handle = f.coordinator.start(prepared);
        let run_id = handle.suite_run_id.clone();
        loop {
            if let SuiteEvent::StepStart { device_id, .. } = handle.events.recv().await.unwrap() {
                if device_id == "panics" {
                    break;
                }
            }
        }
        assert!(sink.is_registered(&run_id, "panics"));

        let result = handle.wait().await.unwrap();

        assert_eq!(result.device_results.len(), 1);
        assert!(!sink.is_registered(&run_id, "panics"));
        assert!(!sink.is_registered(&run_id, "healthy"));
    }

    #[tokio::test]
    async fn aborted_devices_still_complete_progress() {
        let healthy = Arc::new(ScriptedDevice::new("healthy"));
        let broken_env = Arc::new(ScriptedDevice::new("no-env"));
        broken_env.fail_environment("device offline");
        let panicking = Arc::new(ScriptedDevice::new("panics"));
        panicking.panic_on("tap");
        let f = fixture(
            vec![healthy, broken_env, panicking],
            vec![tap_scenario("s1"), tap_scenario("s2")],
        );
        let request =
            ExecutionRequest::new(ids(&["healthy", "no-env", "panics"]), ids(&["s1", "s2"]))
                .repeat_count(2);

        let prepared = f.coordinator.prepare("suite", "Suite", request).await.unwrap();
        let state = Arc::clone(&prepared.state);
        f.coordinator.run(prepared).await.unwrap();

        assert_eq!(state.total_units(), 12);
        assert_eq!(state.completed_units(), 12);
        assert_eq!(state.overall_progress(), 100.0);
        for id in ["healthy", "no-env", "panics"] {
            assert_eq!(state.device(id).unwrap().completed_slots, 4, "{id}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_run_future_still_settles() {
        let device = Arc::new(ScriptedDevice::new("d1").with_latency(Duration::from_millis(100)));
        let f = fixture(vec![device], vec![tap_scenario("s1")]);
        let request = ExecutionRequest::new(ids(&["d1"]), ids(&["s1"]));
        let mut events = f.coordinator.subscribe();

        let prepared = f.coordinator.prepare("suite", "Suite", request).await.unwrap();
        let run_id = prepared.suite_run_id().to_string();
        let waited =
            tokio::time::timeout(Duration::from_millis(50), f.coordinator.run(prepared)).await;
        assert!(waited.is_err());
        assert!(f.coordinator.registry().get(&run_id).is_some());

        loop {
            if let SuiteEvent::Complete { suite_run_id, .. } = events.recv().await.unwrap() {
                assert_eq!(suite_run_id, run_id);
                break;
            }
        }
        assert!(f.coordinator.registry().is_empty());
        assert!(f.results.get(&run_id).is_some());
    }
}
