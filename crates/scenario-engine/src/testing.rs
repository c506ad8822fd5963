//! Test helpers: a programmable device and scenario graph builders.
//!
//! Enabled for this crate's own tests and, for downstream crates, behind
//! the `test-support` feature.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::errors::DeviceError;
use crate::traits::DeviceActionProvider;
use crate::types::*;

// ---------------------------------------------------------------------------
// ScriptedDevice
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Script {
    calls: Vec<String>,
    errors: HashMap<String, VecDeque<String>>,
    outcomes: HashMap<String, VecDeque<ActionOutcome>>,
    probe_calls: HashMap<String, u32>,
    appear_after: HashMap<String, u32>,
    probe_errors: VecDeque<String>,
    screenshot_error: Option<String>,
    environment_error: Option<String>,
    panic_on: Option<String>,
    latency: Duration,
}

/// A [`DeviceActionProvider`] whose behavior is scripted per action.
///
/// Every action succeeds unless scripted otherwise. Action names in the
/// call log use their `actionType` spelling (`tap`, `launchApp`, ...).
/// Probes key elements by selector value, text by the text itself, and
/// images by template name.
pub struct ScriptedDevice {
    id: String,
    script: Mutex<Script>,
}

impl ScriptedDevice {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(Script::default()),
        }
    }

    /// Every action sleeps this long before answering.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.script.lock().latency = latency;
        self
    }

    /// The next `times` calls of `action` raise `message`, classified.
    pub fn fail_action(&self, action: &str, times: usize, message: &str) {
        let mut script = self.script.lock();
        let queue = script.errors.entry(action.to_string()).or_default();
        queue.extend(std::iter::repeat(message.to_string()).take(times));
    }

    /// The next call of `action` returns `outcome` instead of success.
    pub fn script_outcome(&self, action: &str, outcome: ActionOutcome) {
        self.script
            .lock()
            .outcomes
            .entry(action.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Probes for `key` report present from the `nth` probe call onward.
    pub fn appear_after(&self, key: &str, nth: u32) {
        self.script.lock().appear_after.insert(key.to_string(), nth);
    }

    /// The next `times` probe calls raise `message`, classified.
    pub fn fail_probe_times(&self, times: usize, message: &str) {
        let mut script = self.script.lock();
        script
            .probe_errors
            .extend(std::iter::repeat(message.to_string()).take(times));
    }

    pub fn fail_screenshot(&self, message: &str) {
        self.script.lock().screenshot_error = Some(message.to_string());
    }

    pub fn fail_environment(&self, message: &str) {
        self.script.lock().environment_error = Some(message.to_string());
    }

    /// Panic inside `action`, simulating a provider bug.
    pub fn panic_on(&self, action: &str) {
        self.script.lock().panic_on = Some(action.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().calls.clone()
    }

    pub fn call_count(&self, action: &str) -> usize {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|c| c.as_str() == action)
            .count()
    }

    async fn act(&self, action: &str) -> Result<ActionOutcome, DeviceError> {
        let (latency, panics) = {
            let mut script = self.script.lock();
            script.calls.push(action.to_string());
            (script.latency, script.panic_on.as_deref() == Some(action))
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if panics {
            panic!("scripted panic in {action}");
        }
        let mut script = self.script.lock();
        if let Some(message) = script.errors.get_mut(action).and_then(VecDeque::pop_front) {
            return Err(DeviceError::classify(message));
        }
        Ok(script
            .outcomes
            .get_mut(action)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(ActionOutcome::ok))
    }

    fn probe(&self, key: &str) -> Result<bool, DeviceError> {
        let mut script = self.script.lock();
        let count = {
            let c = script.probe_calls.entry(key.to_string()).or_insert(0);
            *c += 1;
            *c
        };
        if let Some(message) = script.probe_errors.pop_front() {
            return Err(DeviceError::classify(message));
        }
        Ok(script
            .appear_after
            .get(key)
            .map_or(false, |nth| count >= *nth))
    }
}

#[async_trait]
impl DeviceActionProvider for ScriptedDevice {
    fn device_id(&self) -> &str {
        &self.id
    }

    async fn environment(&self) -> Result<DeviceEnvironment, DeviceError> {
        if let Some(message) = self.script.lock().environment_error.clone() {
            return Err(DeviceError::classify(message));
        }
        Ok(DeviceEnvironment {
            platform: "android".into(),
            os_version: "14".into(),
            model: format!("scripted-{}", self.id),
            screen_width: Some(1080),
            screen_height: Some(2400),
            ..DeviceEnvironment::default()
        })
    }

    async fn tap(&self, _x: i32, _y: i32) -> Result<ActionOutcome, DeviceError> {
        self.act("tap").await
    }

    async fn tap_element(&self, _selector: &Selector) -> Result<ActionOutcome, DeviceError> {
        self.act("tapElement").await
    }

    async fn double_tap(&self, _x: i32, _y: i32) -> Result<ActionOutcome, DeviceError> {
        self.act("doubleTap").await
    }

    async fn long_press(
        &self,
        _x: i32,
        _y: i32,
        _duration: Duration,
    ) -> Result<ActionOutcome, DeviceError> {
        self.act("longPress").await
    }

    async fn swipe(
        &self,
        _from: (i32, i32),
        _to: (i32, i32),
        _duration: Duration,
    ) -> Result<ActionOutcome, DeviceError> {
        self.act("swipe").await
    }

    async fn input_text(
        &self,
        _text: &str,
        _selector: Option<&Selector>,
    ) -> Result<ActionOutcome, DeviceError> {
        self.act("inputText").await
    }

    async fn press_key(&self, _key: &str) -> Result<ActionOutcome, DeviceError> {
        self.act("pressKey").await
    }

    async fn launch_app(&self, _package: &str) -> Result<ActionOutcome, DeviceError> {
        self.act("launchApp").await
    }

    async fn terminate_app(&self, _package: &str) -> Result<ActionOutcome, DeviceError> {
        self.act("terminateApp").await
    }

    async fn clear_app_data(&self, _package: &str) -> Result<ActionOutcome, DeviceError> {
        self.act("clearAppData").await
    }

    async fn element_exists(&self, selector: &Selector) -> Result<bool, DeviceError> {
        self.probe(&selector.value)
    }

    async fn text_exists(&self, text: &str) -> Result<bool, DeviceError> {
        self.probe(text)
    }

    async fn find_image(&self, image: &ImageTemplate) -> Result<Option<ImageMatch>, DeviceError> {
        Ok(self.probe(&image.template)?.then_some(ImageMatch {
            confidence: 0.95,
            x: 540,
            y: 1200,
        }))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DeviceError> {
        match self.script.lock().screenshot_error.clone() {
            Some(message) => Err(DeviceError::classify(message)),
            None => Ok(vec![0x89, b'P', b'N', b'G']),
        }
    }
}

// ---------------------------------------------------------------------------
// Graph builders
// ---------------------------------------------------------------------------

/// Fluent [`ScenarioGraph`] builder. Starts with a `start` node.
pub struct GraphBuilder {
    graph: ScenarioGraph,
}

impl GraphBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            graph: ScenarioGraph {
                id: id.to_string(),
                name: id.to_string(),
                nodes: vec![node("start", NodeKind::Start, Value::Null)],
                connections: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.graph.name = name.to_string();
        self
    }

    /// Action node; `params` carries `actionType` and its fields.
    pub fn action(mut self, id: &str, params: Value) -> Self {
        self.graph.nodes.push(node(id, NodeKind::Action, params));
        self
    }

    /// Condition node; `params` carries `conditionType` and its fields.
    pub fn condition(mut self, id: &str, params: Value) -> Self {
        self.graph.nodes.push(node(id, NodeKind::Condition, params));
        self
    }

    pub fn end(mut self, id: &str) -> Self {
        self.graph.nodes.push(node(id, NodeKind::End, Value::Null));
        self
    }

    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.graph.connections.push(Connection {
            from: from.to_string(),
            to: to.to_string(),
            branch: None,
        });
        self
    }

    pub fn branch(mut self, from: &str, label: &str, to: &str) -> Self {
        self.graph.connections.push(Connection {
            from: from.to_string(),
            to: to.to_string(),
            branch: Some(label.to_string()),
        });
        self
    }

    pub fn build(self) -> ScenarioGraph {
        self.graph
    }
}

/// `start -> a1 -> a2 -> ... -> end`, one action node per params entry,
/// with node ids `a1`, `a2`, ...
pub fn linear_graph(id: &str, actions: &[Value]) -> ScenarioGraph {
    let mut builder = GraphBuilder::new(id);
    let mut previous = "start".to_string();
    for (i, params) in actions.iter().enumerate() {
        let node_id = format!("a{}", i + 1);
        builder = builder.action(&node_id, params.clone()).edge(&previous, &node_id);
        previous = node_id;
    }
    builder.end("end").edge(&previous, "end").build()
}

fn node(id: &str, kind: NodeKind, params: Value) -> Node {
    let params = match params {
        Value::Object(map) => map.into_iter().collect(),
        _ => Default::default(),
    };
    Node {
        id: id.to_string(),
        kind,
        label: None,
        params,
    }
}
