//! Artifact correlation and capture records.

use serde::{Deserialize, Serialize};

/// Identifies which device run an artifact belongs to.
///
/// Passed explicitly alongside every device call instead of being looked
/// up from shared state, so concurrent devices never cross-correlate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct CorrelationContext {
    pub suite_run_id: String,
    /// Id of the [`SuiteExecutionResult`](super::SuiteExecutionResult) being built.
    pub report_id: String,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<u32>,
}

impl CorrelationContext {
    pub fn for_device(
        suite_run_id: impl Into<String>,
        report_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            suite_run_id: suite_run_id.into(),
            report_id: report_id.into(),
            device_id: device_id.into(),
            scenario_id: None,
            repeat: None,
        }
    }

    /// Narrow a device context to one scenario execution.
    pub fn for_scenario(&self, scenario_id: &str, repeat: u32) -> Self {
        Self {
            scenario_id: Some(scenario_id.to_string()),
            repeat: Some(repeat),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    FailureScreenshot,
}

/// An in-memory artifact on its way to the sink. The buffer is dropped as
/// soon as the sink returns.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub node_id: Option<String>,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// What the sink reports back once an artifact is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SavedArtifact {
    pub path: String,
    pub kind: ArtifactKind,
    pub device_id: String,
    pub report_id: String,
}

/// Result of a [`VideoRecorder`](crate::traits::VideoRecorder) call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct VideoOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VideoOutcome {
    pub fn started() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn saved(path: impl Into<String>) -> Self {
        Self {
            success: true,
            local_path: Some(path.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            local_path: None,
            error: Some(error.into()),
        }
    }
}
