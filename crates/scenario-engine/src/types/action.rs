//! Typed action and condition kinds decoded from node params.
//!
//! The editor stores actions as a string-keyed bag (`actionType` plus
//! fields). The engine decodes that bag once into a closed [`Action`]
//! union so the dispatcher can match it exhaustively. Anything that does
//! not decode surfaces as an [`ActionParseError`], which the step runner
//! records as a failed step.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::graph::{Node, NodeKind};

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

/// How a device provider should locate an element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub enum SelectorStrategy {
    #[default]
    Id,
    Text,
    AccessibilityId,
    Xpath,
    ClassName,
}

/// An element locator. Resolution is entirely up to the device provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default)]
    pub strategy: SelectorStrategy,
    pub value: String,
}

impl Selector {
    pub fn id(value: impl Into<String>) -> Self {
        Self {
            strategy: SelectorStrategy::Id,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}={}", self.strategy, self.value)
    }
}

/// A reference image to match on screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ImageTemplate {
    /// Template identifier understood by the image matcher.
    pub template: String,
    /// Minimum match confidence in `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Discriminant of [`Action`], decodable from the raw `actionType` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Tap,
    TapElement,
    DoubleTap,
    LongPress,
    Swipe,
    InputText,
    PressKey,
    LaunchApp,
    TerminateApp,
    ClearAppData,
    Wait,
    WaitUntilExists,
    WaitUntilGone,
    WaitUntilTextExists,
    WaitUntilTextGone,
    WaitUntilImage,
    WaitUntilImageGone,
}

impl ActionKind {
    /// Decode an `actionType` string. `None` for unknown types.
    pub fn parse(action_type: &str) -> Option<Self> {
        serde_json::from_value(Value::String(action_type.to_string())).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tap => "tap",
            Self::TapElement => "tapElement",
            Self::DoubleTap => "doubleTap",
            Self::LongPress => "longPress",
            Self::Swipe => "swipe",
            Self::InputText => "inputText",
            Self::PressKey => "pressKey",
            Self::LaunchApp => "launchApp",
            Self::TerminateApp => "terminateApp",
            Self::ClearAppData => "clearAppData",
            Self::Wait => "wait",
            Self::WaitUntilExists => "waitUntilExists",
            Self::WaitUntilGone => "waitUntilGone",
            Self::WaitUntilTextExists => "waitUntilTextExists",
            Self::WaitUntilTextGone => "waitUntilTextGone",
            Self::WaitUntilImage => "waitUntilImage",
            Self::WaitUntilImageGone => "waitUntilImageGone",
        }
    }

    /// Whether the action blocks until a screen condition holds.
    pub fn is_wait_class(&self) -> bool {
        matches!(
            self,
            Self::WaitUntilExists
                | Self::WaitUntilGone
                | Self::WaitUntilTextExists
                | Self::WaitUntilTextGone
                | Self::WaitUntilImage
                | Self::WaitUntilImageGone
        )
    }
}

/// Wait-class check on a raw `actionType`: known kinds by set membership,
/// unknown ones by the `waitUntil` prefix.
pub fn is_wait_class(action_type: &str) -> bool {
    match ActionKind::parse(action_type) {
        Some(kind) => kind.is_wait_class(),
        None => action_type.starts_with("waitUntil"),
    }
}

/// A device action, one variant per [`DeviceActionProvider`] method.
///
/// [`DeviceActionProvider`]: crate::traits::DeviceActionProvider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(
    tag = "actionType",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Action {
    Tap {
        x: i32,
        y: i32,
    },
    TapElement {
        selector: Selector,
    },
    DoubleTap {
        x: i32,
        y: i32,
    },
    LongPress {
        x: i32,
        y: i32,
        #[serde(rename = "duration", default = "default_long_press_ms")]
        duration_ms: u64,
    },
    Swipe {
        start_x: i32,
        start_y: i32,
        end_x: i32,
        end_y: i32,
        #[serde(rename = "duration", default = "default_swipe_ms")]
        duration_ms: u64,
    },
    InputText {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<Selector>,
    },
    PressKey {
        key: String,
    },
    LaunchApp {
        package: String,
    },
    TerminateApp {
        package: String,
    },
    ClearAppData {
        package: String,
    },
    Wait {
        #[serde(rename = "duration")]
        duration_ms: u64,
    },
    WaitUntilExists {
        selector: Selector,
    },
    WaitUntilGone {
        selector: Selector,
    },
    WaitUntilTextExists {
        text: String,
    },
    WaitUntilTextGone {
        text: String,
    },
    WaitUntilImage {
        #[serde(flatten)]
        image: ImageTemplate,
    },
    WaitUntilImageGone {
        #[serde(flatten)]
        image: ImageTemplate,
    },
}

fn default_long_press_ms() -> u64 {
    1_000
}

fn default_swipe_ms() -> u64 {
    300
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Tap { .. } => ActionKind::Tap,
            Self::TapElement { .. } => ActionKind::TapElement,
            Self::DoubleTap { .. } => ActionKind::DoubleTap,
            Self::LongPress { .. } => ActionKind::LongPress,
            Self::Swipe { .. } => ActionKind::Swipe,
            Self::InputText { .. } => ActionKind::InputText,
            Self::PressKey { .. } => ActionKind::PressKey,
            Self::LaunchApp { .. } => ActionKind::LaunchApp,
            Self::TerminateApp { .. } => ActionKind::TerminateApp,
            Self::ClearAppData { .. } => ActionKind::ClearAppData,
            Self::Wait { .. } => ActionKind::Wait,
            Self::WaitUntilExists { .. } => ActionKind::WaitUntilExists,
            Self::WaitUntilGone { .. } => ActionKind::WaitUntilGone,
            Self::WaitUntilTextExists { .. } => ActionKind::WaitUntilTextExists,
            Self::WaitUntilTextGone { .. } => ActionKind::WaitUntilTextGone,
            Self::WaitUntilImage { .. } => ActionKind::WaitUntilImage,
            Self::WaitUntilImageGone { .. } => ActionKind::WaitUntilImageGone,
        }
    }

    /// Decode the action carried by an action node.
    pub fn from_node(node: &Node) -> Result<Self, ActionParseError> {
        let action_type = match (node.kind, node.action_type()) {
            (NodeKind::Action, Some(t)) => t,
            _ => {
                return Err(ActionParseError::Unknown {
                    action_type: node.step_type().to_string(),
                })
            }
        };
        if ActionKind::parse(action_type).is_none() {
            return Err(ActionParseError::Unknown {
                action_type: action_type.to_string(),
            });
        }
        serde_json::from_value(node.params_value()).map_err(|e| ActionParseError::InvalidParams {
            action_type: action_type.to_string(),
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// A screen predicate evaluated by a condition node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(
    tag = "conditionType",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Condition {
    ElementExists {
        selector: Selector,
    },
    ElementNotExists {
        selector: Selector,
    },
    TextExists {
        text: String,
    },
    TextNotExists {
        text: String,
    },
    ImageExists {
        #[serde(flatten)]
        image: ImageTemplate,
    },
    ImageNotExists {
        #[serde(flatten)]
        image: ImageTemplate,
    },
}

impl Condition {
    /// Decode the condition carried by a condition node.
    pub fn from_node(node: &Node) -> Result<Self, ActionParseError> {
        serde_json::from_value(node.params_value()).map_err(|e| ActionParseError::InvalidParams {
            action_type: "condition".into(),
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Step options
// ---------------------------------------------------------------------------

/// Per-node overrides shared by every node kind. Unset fields fall back to
/// [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct StepOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Milliseconds between retry attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<u64>,
    /// Wait-class timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Wait-class polling interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_visits: Option<u32>,
}

impl StepOptions {
    /// Decode step options; malformed option fields are ignored.
    pub fn from_node(node: &Node) -> Self {
        match serde_json::from_value(node.params_value()) {
            Ok(opts) => opts,
            Err(e) => {
                tracing::warn!(node_id = %node.id, error = %e, "ignoring malformed step options");
                Self::default()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a node's params could not be decoded into an [`Action`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ActionParseError {
    #[error("Unknown action type: {action_type}")]
    Unknown { action_type: String },
    #[error("Invalid parameters for {action_type}: {message}")]
    InvalidParams {
        action_type: String,
        message: String,
    },
}
