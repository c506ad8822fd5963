//! One scenario walk on one device, node by node.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::dispatch::{ActionContext, ActionDispatcher};
use super::navigator::GraphNavigator;
use crate::config::EngineConfig;
use crate::events::SuiteEvent;
use crate::traits::{elapsed_ms, DeviceActionProvider};
use crate::types::*;

/// Error recorded on a scenario interrupted by a stop request.
pub(crate) const STOPPED_MESSAGE: &str = "execution stopped";

/// How the walk continues after a node.
enum StepFlow {
    /// Move on; `Some` carries a condition's evaluated branch.
    Continue(Option<bool>),
    /// The step failed; no further nodes are visited.
    Halt(String),
}

/// Executes nodes for one device and records their [`StepResult`]s.
pub(crate) struct StepRunner {
    pub suite_run_id: String,
    pub device: Arc<dyn DeviceActionProvider>,
    pub dispatcher: ActionDispatcher,
    pub config: Arc<EngineConfig>,
    pub events: broadcast::Sender<SuiteEvent>,
}

impl StepRunner {
    /// Walk `graph` from its start node.
    ///
    /// The stop token is checked before every node except `end`. A raised
    /// token ends the walk after the step in flight, and the scenario is
    /// recorded as failed with [`STOPPED_MESSAGE`]. A walk that already
    /// reached its `end` node keeps its outcome.
    pub async fn run_scenario(
        &self,
        graph: &ScenarioGraph,
        ctx: &ActionContext,
        repeat: u32,
    ) -> ScenarioResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut result = ScenarioResult {
            scenario_id: graph.id.clone(),
            scenario_name: graph.name.clone(),
            repeat,
            status: ScenarioStatus::Passed,
            started_at,
            completed_at: started_at,
            duration_ms: 0,
            error: None,
            step_results: Vec::new(),
            screenshots: Vec::new(),
            video_path: None,
        };

        let mut navigator = GraphNavigator::new(graph, self.config.max_node_visits);
        let mut current = navigator.start();
        if current.is_none() {
            result.status = ScenarioStatus::Failed;
            result.error = Some("scenario has no start node".into());
        }

        while let Some(node) = current {
            if node.kind != NodeKind::End && ctx.cancel.is_cancelled() {
                tracing::info!(
                    device_id = %ctx.correlation.device_id,
                    scenario_id = %graph.id,
                    node_id = %node.id,
                    "stop requested, ending walk"
                );
                result.status = ScenarioStatus::Failed;
                result.error = Some(STOPPED_MESSAGE.into());
                break;
            }
            match self.run_step(node, ctx, &mut result).await {
                StepFlow::Continue(branch) => current = navigator.advance(node, branch),
                StepFlow::Halt(error) => {
                    result.status = ScenarioStatus::Failed;
                    result.error = Some(error);
                    break;
                }
            }
        }

        result.completed_at = Utc::now();
        result.duration_ms = elapsed_ms(clock);
        result
    }

    async fn run_step(
        &self,
        node: &Node,
        ctx: &ActionContext,
        result: &mut ScenarioResult,
    ) -> StepFlow {
        if matches!(node.kind, NodeKind::Start | NodeKind::End) {
            return StepFlow::Continue(None);
        }

        let options = StepOptions::from_node(node);
        let action_type = node.step_type().to_string();
        let pre_call = Utc::now();
        let clock = Instant::now();
        tracing::debug!(
            device_id = %ctx.correlation.device_id,
            node_id = %node.id,
            action_type = %action_type,
            "step start"
        );
        self.emit(SuiteEvent::StepStart {
            suite_run_id: self.suite_run_id.clone(),
            device_id: ctx.correlation.device_id.clone(),
            scenario_id: result.scenario_id.clone(),
            node_id: node.id.clone(),
            node_name: node.display_name().to_string(),
            action_type: action_type.clone(),
            timestamp: pre_call,
        });

        let record = |status: StepStatus,
                      duration_ms: u64,
                      error: Option<String>,
                      timestamp: DateTime<Utc>,
                      performance: Option<ActionPerformance>| StepResult {
            node_id: node.id.clone(),
            node_name: node.display_name().to_string(),
            action_type: action_type.clone(),
            status,
            duration_ms,
            error,
            timestamp,
            performance,
        };

        if options.disabled {
            let step = record(StepStatus::Skipped, 0, None, pre_call, None);
            self.complete(ctx, result, step);
            return StepFlow::Continue(None);
        }

        if node.kind == NodeKind::Condition {
            let outcome = self
                .dispatcher
                .evaluate_condition(node, &options, self.device.as_ref(), ctx)
                .await;
            tracing::debug!(node_id = %node.id, outcome, "condition evaluated");
            let step = record(StepStatus::Passed, elapsed_ms(clock), None, pre_call, None);
            self.complete(ctx, result, step);
            return StepFlow::Continue(Some(outcome));
        }

        let wait_class = is_wait_class(&action_type);
        if wait_class {
            let waiting = record(StepStatus::Waiting, 0, None, pre_call, None);
            result.step_results.push(waiting.clone());
            self.emit(SuiteEvent::StepWaiting {
                suite_run_id: self.suite_run_id.clone(),
                device_id: ctx.correlation.device_id.clone(),
                scenario_id: result.scenario_id.clone(),
                step: waiting,
            });
        }

        let dispatched = self
            .dispatcher
            .execute(node, &options, self.device.as_ref(), ctx)
            .await;
        let outcome = dispatched.outcome;
        if let Some(path) = dispatched.screenshot {
            result.screenshots.push(path);
        }

        let timestamp = if wait_class { Utc::now() } else { pre_call };
        let (status, error) = if outcome.success {
            (StepStatus::Passed, None)
        } else {
            let message = outcome
                .message
                .clone()
                .unwrap_or_else(|| format!("{action_type} failed"));
            (StepStatus::Failed, Some(message))
        };
        let step = record(
            status,
            elapsed_ms(clock),
            error.clone(),
            timestamp,
            outcome.performance,
        );
        self.complete(ctx, result, step);

        match error {
            Some(message) => StepFlow::Halt(message),
            None => StepFlow::Continue(None),
        }
    }

    fn complete(&self, ctx: &ActionContext, result: &mut ScenarioResult, step: StepResult) {
        result.step_results.push(step.clone());
        self.emit(SuiteEvent::StepComplete {
            suite_run_id: self.suite_run_id.clone(),
            device_id: ctx.correlation.device_id.clone(),
            scenario_id: result.scenario_id.clone(),
            step,
        });
    }

    fn emit(&self, event: SuiteEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{linear_graph, GraphBuilder, ScriptedDevice};
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn runner(device: Arc<ScriptedDevice>) -> (StepRunner, broadcast::Receiver<SuiteEvent>) {
        let config = Arc::new(EngineConfig {
            retry: RetryPolicy::new(2, 50),
            ..EngineConfig::default()
        });
        let (tx, rx) = broadcast::channel(256);
        let runner = StepRunner {
            suite_run_id: "run-1".into(),
            device,
            dispatcher: ActionDispatcher::new(config.clone(), None),
            config,
            events: tx,
        };
        (runner, rx)
    }

    fn ctx() -> ActionContext {
        ActionContext {
            correlation: CorrelationContext::for_device("run-1", "run-1", "dev-1")
                .for_scenario("s1", 1),
            cancel: CancellationToken::new(),
        }
    }

    fn topics(rx: &mut broadcast::Receiver<SuiteEvent>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev.topic());
        }
        out
    }

    #[tokio::test]
    async fn linear_walk_records_each_action_once() {
        let device = Arc::new(ScriptedDevice::new("dev-1"));
        let (runner, mut rx) = runner(device.clone());
        let graph = linear_graph(
            "s1",
            &[
                json!({"actionType": "launchApp", "package": "com.example"}),
                json!({"actionType": "tap", "x": 10, "y": 20}),
            ],
        );

        let result = runner.run_scenario(&graph, &ctx(), 1).await;

        assert_eq!(result.status, ScenarioStatus::Passed);
        let ids: Vec<_> = result.step_results.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(ids, ["a1", "a2"]);
        assert_eq!(device.calls(), ["launchApp", "tap"]);
        assert_eq!(
            topics(&mut rx),
            [
                "suite:step:start",
                "suite:step:complete",
                "suite:step:start",
                "suite:step:complete"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_class_step_records_waiting_then_terminal() {
        let device = Arc::new(ScriptedDevice::new("dev-1"));
        device.appear_after("Home", 3);
        let (runner, mut rx) = runner(device);
        let graph = linear_graph(
            "s1",
            &[json!({"actionType": "waitUntilTextExists", "text": "Home", "interval": 100})],
        );

        let result = runner.run_scenario(&graph, &ctx(), 1).await;

        assert_eq!(result.status, ScenarioStatus::Passed);
        let steps = &result.step_results;
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].status, StepStatus::Waiting);
        assert_eq!(steps[1].status, StepStatus::Passed);
        assert!(steps[1].timestamp >= steps[0].timestamp);
        assert_eq!(
            topics(&mut rx),
            ["suite:step:start", "suite:step:waiting", "suite:step:complete"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_step_halts_walk() {
        let device = Arc::new(ScriptedDevice::new("dev-1"));
        device.fail_action("tap", 1, "invalid session id");
        let (runner, _rx) = runner(device.clone());
        let graph = linear_graph(
            "s1",
            &[
                json!({"actionType": "tap", "x": 1, "y": 1}),
                json!({"actionType": "pressKey", "key": "HOME"}),
            ],
        );

        let result = runner.run_scenario(&graph, &ctx(), 1).await;

        assert_eq!(result.status, ScenarioStatus::Failed);
        assert_eq!(result.step_results.len(), 1);
        assert_eq!(result.step_results[0].status, StepStatus::Failed);
        assert!(result.error.unwrap().contains("invalid session id"));
        assert_eq!(device.call_count("pressKey"), 0);
    }

    #[tokio::test]
    async fn unknown_action_fails_scenario() {
        let device = Arc::new(ScriptedDevice::new("dev-1"));
        let (runner, _rx) = runner(device);
        let graph = linear_graph("s1", &[json!({"actionType": "hover"})]);

        let result = runner.run_scenario(&graph, &ctx(), 1).await;

        assert_eq!(result.status, ScenarioStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("Unknown action type: hover"));
    }

    #[tokio::test]
    async fn condition_step_passes_and_branches() {
        let device = Arc::new(ScriptedDevice::new("dev-1"));
        let (runner, _rx) = runner(device.clone());
        let graph = GraphBuilder::new("s1")
            .condition(
                "logged_in",
                json!({"conditionType": "textExists", "text": "Logout"}),
            )
            .action("login", json!({"actionType": "tapElement", "selector": {"value": "login"}}))
            .action("home", json!({"actionType": "pressKey", "key": "HOME"}))
            .end("end")
            .edge("start", "logged_in")
            .branch("logged_in", "yes", "home")
            .branch("logged_in", "no", "login")
            .edge("login", "end")
            .edge("home", "end")
            .build();

        let result = runner.run_scenario(&graph, &ctx(), 1).await;

        assert_eq!(result.status, ScenarioStatus::Passed);
        assert_eq!(result.step_results[0].node_id, "logged_in");
        assert_eq!(result.step_results[0].status, StepStatus::Passed);
        assert_eq!(result.step_results[0].action_type, "condition");
        assert_eq!(device.calls(), ["tapElement"]);
    }

    #[tokio::test]
    async fn disabled_node_is_skipped() {
        let device = Arc::new(ScriptedDevice::new("dev-1"));
        let (runner, _rx) = runner(device.clone());
        let graph = linear_graph(
            "s1",
            &[
                json!({"actionType": "tap", "x": 1, "y": 1, "disabled": true}),
                json!({"actionType": "pressKey", "key": "BACK"}),
            ],
        );

        let result = runner.run_scenario(&graph, &ctx(), 1).await;

        assert_eq!(result.status, ScenarioStatus::Passed);
        assert_eq!(result.step_results[0].status, StepStatus::Skipped);
        assert_eq!(result.step_results[1].status, StepStatus::Passed);
        assert_eq!(device.calls(), ["pressKey"]);
    }

    #[tokio::test]
    async fn raised_stop_ends_walk_before_next_node() {
        let device = Arc::new(ScriptedDevice::new("dev-1"));
        let (runner, _rx) = runner(device.clone());
        let graph = linear_graph("s1", &[json!({"actionType": "tap", "x": 1, "y": 1})]);
        let ctx = ctx();
        ctx.cancel.cancel();

        let result = runner.run_scenario(&graph, &ctx, 1).await;

        assert_eq!(result.status, ScenarioStatus::Failed);
        assert_eq!(result.error.as_deref(), Some(STOPPED_MESSAGE));
        assert!(device.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_after_last_step_keeps_passed_outcome() {
        let device =
            Arc::new(ScriptedDevice::new("dev-1").with_latency(Duration::from_millis(100)));
        let (runner, _rx) = runner(device.clone());
        let graph = linear_graph(
            "s1",
            &[
                json!({"actionType": "tap", "x": 1, "y": 1}),
                json!({"actionType": "pressKey", "key": "BACK"}),
            ],
        );
        let ctx = ctx();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            // Lands while the last action is in flight.
            tokio::time::sleep(Duration::from_millis(150)).await;
            cancel.cancel();
        });

        let result = runner.run_scenario(&graph, &ctx, 1).await;

        assert!(ctx.cancel.is_cancelled());
        assert_eq!(result.status, ScenarioStatus::Passed);
        assert_eq!(result.error, None);
        assert_eq!(device.calls(), ["tap", "pressKey"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_step_ends_walk_before_next_action() {
        let device =
            Arc::new(ScriptedDevice::new("dev-1").with_latency(Duration::from_millis(100)));
        let (runner, _rx) = runner(device.clone());
        let graph = linear_graph(
            "s1",
            &[
                json!({"actionType": "tap", "x": 1, "y": 1}),
                json!({"actionType": "pressKey", "key": "BACK"}),
            ],
        );
        let ctx = ctx();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let result = runner.run_scenario(&graph, &ctx, 1).await;

        assert_eq!(result.status, ScenarioStatus::Failed);
        assert_eq!(result.error.as_deref(), Some(STOPPED_MESSAGE));
        assert_eq!(device.calls(), ["tap"]);
    }

    #[tokio::test]
    async fn graph_without_start_fails() {
        let device = Arc::new(ScriptedDevice::new("dev-1"));
        let (runner, _rx) = runner(device);
        let graph = ScenarioGraph {
            id: "s1".into(),
            name: "broken".into(),
            nodes: Vec::new(),
            connections: Vec::new(),
        };

        let result = runner.run_scenario(&graph, &ctx(), 1).await;

        assert_eq!(result.status, ScenarioStatus::Failed);
        assert!(result.step_results.is_empty());
    }
}
