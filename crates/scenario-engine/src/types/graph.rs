//! Scenario graph schema: the contract between the visual editor and the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A named graph of UI actions describing one test flow.
///
/// Graphs are owned by the [`ScenarioStore`](crate::traits::ScenarioStore)
/// and only ever read by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ScenarioGraph {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<Node>,
    #[serde(default, alias = "edges")]
    pub connections: Vec<Connection>,
}

impl ScenarioGraph {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The first `start` node, if the graph has one.
    pub fn start_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.kind == NodeKind::Start)
    }
}

/// The role a node plays in the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    End,
    Action,
    Condition,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Action => "action",
            Self::Condition => "condition",
        }
    }
}

/// One step in a scenario graph.
///
/// `params` is the free-form bag the editor writes: `actionType` plus the
/// action's own fields for action nodes, `conditionType` plus fields for
/// condition nodes, and the shared step options (`retryCount`,
/// `retryDelay`, `timeout`, `interval`, `disabled`, `maxVisits`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// BTreeMap for deterministic serialization.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

impl Node {
    /// Display name: the label when set, the id otherwise.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    /// The raw `actionType` parameter, if any.
    pub fn action_type(&self) -> Option<&str> {
        self.params.get("actionType").and_then(Value::as_str)
    }

    /// `actionType` for action nodes, the node type for everything else.
    pub fn step_type(&self) -> &str {
        match self.kind {
            NodeKind::Action => self.action_type().unwrap_or("action"),
            other => other.as_str(),
        }
    }

    /// Params as a JSON object, for typed deserialization.
    pub fn params_value(&self) -> Value {
        Value::Object(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// A directed connection between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub from: String,
    pub to: String,
    /// `"yes"` / `"no"` on edges leaving a condition node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Branch label for a condition that evaluated to `true`.
pub const BRANCH_YES: &str = "yes";
/// Branch label for a condition that evaluated to `false`.
pub const BRANCH_NO: &str = "no";

/// Conventional edge label for an evaluated condition.
pub fn branch_label(outcome: bool) -> &'static str {
    if outcome {
        BRANCH_YES
    } else {
        BRANCH_NO
    }
}
