//! Maps one node to exactly one device call.
//!
//! Node-level failures never escape as errors: unknown action types, bad
//! params, and device errors all become a failed [`ActionOutcome`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactQueue;
use crate::config::EngineConfig;
use crate::errors::DeviceError;
use crate::retry::{retry, retry_with_hook, sleep_unless_stopped};
use crate::traits::{duration_ms, elapsed_ms, DeviceActionProvider};
use crate::types::*;

/// Per-scenario context threaded through every device call.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub correlation: CorrelationContext,
    pub cancel: CancellationToken,
}

/// What one dispatched action produced.
#[derive(Debug, Clone)]
pub(crate) struct Dispatched {
    pub outcome: ActionOutcome,
    /// Saved path of the failure screenshot, when one was captured.
    pub screenshot: Option<String>,
}

#[derive(Clone)]
pub(crate) struct ActionDispatcher {
    config: Arc<EngineConfig>,
    artifacts: Option<ArtifactQueue>,
}

impl ActionDispatcher {
    pub fn new(config: Arc<EngineConfig>, artifacts: Option<ArtifactQueue>) -> Self {
        Self { config, artifacts }
    }

    /// Run the action on `node`. Failed outcomes trigger a best-effort
    /// failure screenshot.
    pub async fn execute(
        &self,
        node: &Node,
        options: &StepOptions,
        device: &dyn DeviceActionProvider,
        ctx: &ActionContext,
    ) -> Dispatched {
        let started = Instant::now();
        let result = match Action::from_node(node) {
            Ok(action) => self.perform(&action, options, device, &ctx.cancel).await,
            Err(e) => Ok(ActionOutcome::failed(e.to_string())),
        };

        let (mut outcome, stopped) = match result {
            Ok(outcome) => (outcome, false),
            Err(e) => {
                tracing::debug!(node_id = %node.id, error = %e, "device call failed");
                (ActionOutcome::failed(e.to_string()), e == DeviceError::Stopped)
            }
        };
        let performance = outcome.performance.get_or_insert_with(Default::default);
        if performance.total_ms == 0 {
            performance.total_ms = elapsed_ms(started);
        }

        let screenshot = if !outcome.success && !stopped && self.config.capture_on_failure {
            self.capture_failure(node, device, ctx).await
        } else {
            None
        };
        Dispatched {
            outcome,
            screenshot,
        }
    }

    async fn perform(
        &self,
        action: &Action,
        options: &StepOptions,
        device: &dyn DeviceActionProvider,
        cancel: &CancellationToken,
    ) -> Result<ActionOutcome, DeviceError> {
        let policy = self.config.retry_for(options);
        let poll = self.config.poll_for(options);
        match action {
            Action::Tap { x, y } => with_retry(cancel, policy, || device.tap(*x, *y)).await,
            Action::TapElement { selector } => {
                with_retry(cancel, policy, || device.tap_element(selector)).await
            }
            Action::DoubleTap { x, y } => {
                with_retry(cancel, policy, || device.double_tap(*x, *y)).await
            }
            Action::LongPress { x, y, duration_ms } => {
                let duration = Duration::from_millis(*duration_ms);
                with_retry(cancel, policy, || device.long_press(*x, *y, duration)).await
            }
            Action::Swipe {
                start_x,
                start_y,
                end_x,
                end_y,
                duration_ms,
            } => {
                let duration = Duration::from_millis(*duration_ms);
                with_retry(cancel, policy, || {
                    device.swipe((*start_x, *start_y), (*end_x, *end_y), duration)
                })
                .await
            }
            Action::InputText { text, selector } => {
                with_retry(cancel, policy, || device.input_text(text, selector.as_ref())).await
            }
            Action::PressKey { key } => with_retry(cancel, policy, || device.press_key(key)).await,
            Action::LaunchApp { package } => {
                with_retry(cancel, policy, || device.launch_app(package)).await
            }
            Action::TerminateApp { package } => {
                with_retry(cancel, policy, || device.terminate_app(package)).await
            }
            Action::ClearAppData { package } => {
                with_retry(cancel, policy, || device.clear_app_data(package)).await
            }
            Action::Wait { duration_ms } => {
                let started = Instant::now();
                if !sleep_unless_stopped(cancel, Duration::from_millis(*duration_ms)).await {
                    return Err(DeviceError::Stopped);
                }
                let waited = elapsed_ms(started);
                Ok(ActionOutcome::ok().with_performance(ActionPerformance {
                    total_ms: waited,
                    waited_ms: Some(waited),
                    ..ActionPerformance::default()
                }))
            }
            Action::WaitUntilExists { selector } => {
                device.wait_until_exists(selector, poll, cancel).await
            }
            Action::WaitUntilGone { selector } => {
                device.wait_until_gone(selector, poll, cancel).await
            }
            Action::WaitUntilTextExists { text } => {
                device.wait_until_text_exists(text, poll, cancel).await
            }
            Action::WaitUntilTextGone { text } => {
                device.wait_until_text_gone(text, poll, cancel).await
            }
            Action::WaitUntilImage { image } => device.wait_until_image(image, poll, cancel).await,
            Action::WaitUntilImageGone { image } => {
                device.wait_until_image_gone(image, poll, cancel).await
            }
        }
    }

    /// Evaluate a condition node with one probe. Errors and bad params
    /// evaluate to `false`; they never fail the step.
    pub async fn evaluate_condition(
        &self,
        node: &Node,
        options: &StepOptions,
        device: &dyn DeviceActionProvider,
        ctx: &ActionContext,
    ) -> bool {
        let condition = match Condition::from_node(node) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(node_id = %node.id, error = %e, "unreadable condition, taking the \"no\" branch");
                return false;
            }
        };
        let policy = self.config.retry_for(options);
        let cancel = &ctx.cancel;
        let result = match &condition {
            Condition::ElementExists { selector } => {
                probe_with_retry(cancel, policy, || device.element_exists(selector)).await
            }
            Condition::ElementNotExists { selector } => {
                probe_with_retry(cancel, policy, || device.element_exists(selector))
                    .await
                    .map(|present| !present)
            }
            Condition::TextExists { text } => {
                probe_with_retry(cancel, policy, || device.text_exists(text)).await
            }
            Condition::TextNotExists { text } => {
                probe_with_retry(cancel, policy, || device.text_exists(text))
                    .await
                    .map(|present| !present)
            }
            Condition::ImageExists { image } => {
                probe_with_retry(cancel, policy, || async {
                    device.find_image(image).await.map(|m| m.is_some())
                })
                .await
            }
            Condition::ImageNotExists { image } => {
                probe_with_retry(cancel, policy, || async {
                    device.find_image(image).await.map(|m| m.is_none())
                })
                .await
            }
        };
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(node_id = %node.id, error = %e, "condition probe failed, evaluating as false");
                false
            }
        }
    }

    /// Screenshot the device and hand it to the artifact queue. Every
    /// failure here is logged and dropped.
    async fn capture_failure(
        &self,
        node: &Node,
        device: &dyn DeviceActionProvider,
        ctx: &ActionContext,
    ) -> Option<String> {
        let queue = self.artifacts.as_ref()?;
        let bytes = match device.screenshot().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(node_id = %node.id, error = %e, "failure screenshot capture failed");
                return None;
            }
        };
        let correlation = &ctx.correlation;
        let artifact = Artifact {
            kind: ArtifactKind::FailureScreenshot,
            node_id: Some(node.id.clone()),
            file_name: format!(
                "{}_{}_{}_{}.png",
                correlation.device_id,
                correlation.scenario_id.as_deref().unwrap_or("scenario"),
                node.id,
                Utc::now().format("%Y%m%dT%H%M%S%3f"),
            ),
            bytes,
        };
        match queue.save(correlation, artifact).await {
            Ok(saved) => Some(saved.path),
            Err(e) => {
                tracing::warn!(node_id = %node.id, error = %e, "failure screenshot save failed");
                None
            }
        }
    }
}

/// Bounded retry around an immediate action, recording attempts and wall
/// time on the outcome.
async fn with_retry<F, Fut>(
    cancel: &CancellationToken,
    policy: RetryPolicy,
    mut call: F,
) -> Result<ActionOutcome, DeviceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ActionOutcome, DeviceError>>,
{
    let started = Instant::now();
    let mut attempts = 0;
    let mut outcome = retry_with_hook(
        cancel,
        policy,
        DeviceError::is_retryable,
        |attempt, e: &DeviceError| {
            tracing::debug!(attempt, error = %e, "device action failed");
        },
        |attempt| {
            attempts = attempt;
            call()
        },
    )
    .await?;
    let performance = outcome.performance.get_or_insert_with(Default::default);
    performance.total_ms = duration_ms(started.elapsed());
    performance.attempts = Some(attempts);
    Ok(outcome)
}

async fn probe_with_retry<F, Fut>(
    cancel: &CancellationToken,
    policy: RetryPolicy,
    mut probe: F,
) -> Result<bool, DeviceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, DeviceError>>,
{
    retry(cancel, policy, DeviceError::is_retryable, |_| probe()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::InMemoryArtifactSink;
    use crate::testing::ScriptedDevice;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn node(kind: NodeKind, params: Value) -> Node {
        let params: BTreeMap<String, Value> = serde_json::from_value(params).unwrap();
        Node {
            id: "n1".into(),
            kind,
            label: Some("Step".into()),
            params,
        }
    }

    fn ctx() -> ActionContext {
        ActionContext {
            correlation: CorrelationContext::for_device("run", "report", "dev-1")
                .for_scenario("login", 1),
            cancel: CancellationToken::new(),
        }
    }

    fn dispatcher(sink: Option<Arc<InMemoryArtifactSink>>) -> ActionDispatcher {
        let config = EngineConfig {
            retry: RetryPolicy::new(3, 100),
            ..EngineConfig::default()
        };
        let queue = sink.map(|s| ArtifactQueue::new(s, 2));
        ActionDispatcher::new(Arc::new(config), queue)
    }

    async fn run(d: &ActionDispatcher, device: &ScriptedDevice, n: &Node) -> Dispatched {
        d.execute(n, &StepOptions::from_node(n), device, &ctx()).await
    }

    #[tokio::test]
    async fn unknown_action_type_fails_without_device_call() {
        let device = ScriptedDevice::new("dev-1");
        let n = node(NodeKind::Action, json!({"actionType": "teleport"}));

        let out = run(&dispatcher(None), &device, &n).await;

        assert!(!out.outcome.success);
        assert_eq!(
            out.outcome.message.as_deref(),
            Some("Unknown action type: teleport")
        );
        assert!(device.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let device = ScriptedDevice::new("dev-1");
        device.fail_action("tap", 2, "stale element reference");
        let n = node(NodeKind::Action, json!({"actionType": "tap", "x": 1, "y": 2}));

        let out = run(&dispatcher(None), &device, &n).await;

        assert!(out.outcome.success);
        assert_eq!(device.call_count("tap"), 3);
        assert_eq!(out.outcome.performance.unwrap().attempts, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_is_not_retried() {
        let device = ScriptedDevice::new("dev-1");
        device.fail_action("launchApp", 1, "invalid session id");
        let n = node(
            NodeKind::Action,
            json!({"actionType": "launchApp", "package": "com.example", "retryCount": 5}),
        );

        let out = run(&dispatcher(None), &device, &n).await;

        assert!(!out.outcome.success);
        assert_eq!(device.call_count("launchApp"), 1);
        assert!(out.outcome.message.unwrap().contains("invalid session id"));
    }

    #[tokio::test(start_paused = true)]
    async fn node_retry_count_overrides_config() {
        let device = ScriptedDevice::new("dev-1");
        device.fail_action("tap", 5, "element not found");
        let n = node(
            NodeKind::Action,
            json!({"actionType": "tap", "x": 1, "y": 2, "retryCount": 2}),
        );

        let out = run(&dispatcher(None), &device, &n).await;

        assert!(!out.outcome.success);
        assert_eq!(device.call_count("tap"), 2);
    }

    #[tokio::test]
    async fn failure_screenshot_goes_to_sink() {
        let sink = Arc::new(InMemoryArtifactSink::new());
        let device = ScriptedDevice::new("dev-1");
        device.script_outcome("pressKey", ActionOutcome::failed("key rejected"));
        let n = node(NodeKind::Action, json!({"actionType": "pressKey", "key": "BACK"}));

        let out = run(&dispatcher(Some(sink.clone())), &device, &n).await;

        assert!(!out.outcome.success);
        let path = out.screenshot.expect("screenshot path");
        let saved = sink.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].path, path);
        assert_eq!(saved[0].device_id, "dev-1");
        assert_eq!(saved[0].report_id, "report");
    }

    #[tokio::test]
    async fn screenshot_failure_is_swallowed() {
        let sink = Arc::new(InMemoryArtifactSink::new());
        let device = ScriptedDevice::new("dev-1");
        device.script_outcome("tap", ActionOutcome::failed("missed"));
        device.fail_screenshot("screencap crashed");
        let n = node(NodeKind::Action, json!({"actionType": "tap", "x": 1, "y": 2}));

        let out = run(&dispatcher(Some(sink.clone())), &device, &n).await;

        assert!(!out.outcome.success);
        assert_eq!(out.outcome.message.as_deref(), Some("missed"));
        assert!(out.screenshot.is_none());
        assert!(sink.saved().is_empty());
    }

    #[tokio::test]
    async fn successful_action_takes_no_screenshot() {
        let sink = Arc::new(InMemoryArtifactSink::new());
        let device = ScriptedDevice::new("dev-1");
        let n = node(NodeKind::Action, json!({"actionType": "swipe", "startX": 0, "startY": 0, "endX": 5, "endY": 5}));

        let out = run(&dispatcher(Some(sink.clone())), &device, &n).await;

        assert!(out.outcome.success);
        assert!(sink.saved().is_empty());
        assert_eq!(device.calls(), ["swipe"]);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_action_sleeps_for_duration() {
        let device = ScriptedDevice::new("dev-1");
        let n = node(NodeKind::Action, json!({"actionType": "wait", "duration": 750}));

        let started = Instant::now();
        let out = run(&dispatcher(None), &device, &n).await;

        assert!(out.outcome.success);
        assert!(started.elapsed() >= Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_class_action_uses_node_poll_overrides() {
        let device = ScriptedDevice::new("dev-1");
        let n = node(
            NodeKind::Action,
            json!({"actionType": "waitUntilTextExists", "text": "Welcome", "timeout": 1000, "interval": 200}),
        );

        let started = Instant::now();
        let out = run(&dispatcher(None), &device, &n).await;

        assert!(!out.outcome.success);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(1500));
        let attempts = out.outcome.performance.unwrap().attempts.unwrap();
        assert!((4..=6).contains(&attempts), "attempts = {attempts}");
    }

    #[tokio::test]
    async fn condition_evaluates_probe() {
        let device = ScriptedDevice::new("dev-1");
        device.appear_after("Welcome", 1);
        let d = dispatcher(None);
        let yes = node(
            NodeKind::Condition,
            json!({"conditionType": "textExists", "text": "Welcome"}),
        );
        let no = node(
            NodeKind::Condition,
            json!({"conditionType": "elementNotExists", "selector": {"value": "Welcome"}}),
        );

        assert!(d.evaluate_condition(&yes, &StepOptions::default(), &device, &ctx()).await);
        assert!(!d.evaluate_condition(&no, &StepOptions::default(), &device, &ctx()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn condition_probe_error_evaluates_false() {
        let device = ScriptedDevice::new("dev-1");
        device.appear_after("Welcome", 1);
        device.fail_probe_times(1, "session terminated");
        let n = node(
            NodeKind::Condition,
            json!({"conditionType": "textExists", "text": "Welcome"}),
        );

        let d = dispatcher(None);
        assert!(!d.evaluate_condition(&n, &StepOptions::default(), &device, &ctx()).await);
    }
}
