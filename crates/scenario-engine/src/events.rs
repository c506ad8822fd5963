//! Live event stream for suite runs.
//!
//! Events are pushed on a `tokio::sync::broadcast` channel: delivery is
//! at-least-once per occurrence for subscribers that keep up, with no
//! replay. Each variant carries the result or progress object it reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DeviceResult, ScenarioResult, StepResult, SuiteExecutionResult};

/// `current` of `total`, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ProgressCounter {
    pub current: u32,
    pub total: u32,
}

/// Emitted after each scenario starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SuiteProgress {
    pub suite_run_id: String,
    pub suite_id: String,
    pub current_device: String,
    pub current_scenario: String,
    /// Position of the current device among the run's devices.
    pub device_progress: ProgressCounter,
    /// Slot position within the current device (repeats included).
    pub scenario_progress: ProgressCounter,
    /// Completed execution units over devices x scenarios x repeats, in percent.
    pub overall_progress: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(tag = "topic", rename_all_fields = "camelCase")]
#[non_exhaustive]
pub enum SuiteEvent {
    #[serde(rename = "suite:start")]
    Start {
        suite_run_id: String,
        suite_id: String,
        suite_name: String,
        device_ids: Vec<String>,
        scenario_ids: Vec<String>,
        repeat_count: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "suite:progress")]
    Progress(SuiteProgress),
    #[serde(rename = "suite:device:start")]
    DeviceStart {
        suite_run_id: String,
        device_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "suite:device:complete")]
    DeviceComplete {
        suite_run_id: String,
        result: DeviceResult,
    },
    #[serde(rename = "suite:scenario:start")]
    ScenarioStart {
        suite_run_id: String,
        device_id: String,
        scenario_id: String,
        scenario_name: String,
        repeat: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "suite:scenario:complete")]
    ScenarioComplete {
        suite_run_id: String,
        device_id: String,
        result: ScenarioResult,
    },
    #[serde(rename = "suite:step:start")]
    StepStart {
        suite_run_id: String,
        device_id: String,
        scenario_id: String,
        node_id: String,
        node_name: String,
        action_type: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "suite:step:waiting")]
    StepWaiting {
        suite_run_id: String,
        device_id: String,
        scenario_id: String,
        step: StepResult,
    },
    #[serde(rename = "suite:step:complete")]
    StepComplete {
        suite_run_id: String,
        device_id: String,
        scenario_id: String,
        step: StepResult,
    },
    #[serde(rename = "suite:complete")]
    Complete {
        suite_run_id: String,
        result: SuiteExecutionResult,
    },
    #[serde(rename = "suite:stopped")]
    Stopped {
        suite_run_id: String,
        result: SuiteExecutionResult,
    },
}

impl SuiteEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Start { .. } => "suite:start",
            Self::Progress(_) => "suite:progress",
            Self::DeviceStart { .. } => "suite:device:start",
            Self::DeviceComplete { .. } => "suite:device:complete",
            Self::ScenarioStart { .. } => "suite:scenario:start",
            Self::ScenarioComplete { .. } => "suite:scenario:complete",
            Self::StepStart { .. } => "suite:step:start",
            Self::StepWaiting { .. } => "suite:step:waiting",
            Self::StepComplete { .. } => "suite:step:complete",
            Self::Complete { .. } => "suite:complete",
            Self::Stopped { .. } => "suite:stopped",
        }
    }

    pub fn suite_run_id(&self) -> &str {
        match self {
            Self::Progress(p) => &p.suite_run_id,
            Self::Start { suite_run_id, .. }
            | Self::DeviceStart { suite_run_id, .. }
            | Self::DeviceComplete { suite_run_id, .. }
            | Self::ScenarioStart { suite_run_id, .. }
            | Self::ScenarioComplete { suite_run_id, .. }
            | Self::StepStart { suite_run_id, .. }
            | Self::StepWaiting { suite_run_id, .. }
            | Self::StepComplete { suite_run_id, .. }
            | Self::Complete { suite_run_id, .. }
            | Self::Stopped { suite_run_id, .. } => suite_run_id,
        }
    }

    /// `suite:complete` or `suite:stopped`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Stopped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_topic_matches_topic_fn() {
        let ev = SuiteEvent::DeviceStart {
            suite_run_id: "run-1".into(),
            device_id: "pixel".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["topic"], ev.topic());
        assert_eq!(json["suiteRunId"], "run-1");
        assert_eq!(json["deviceId"], "pixel");
        assert_eq!(ev.suite_run_id(), "run-1");
    }

    #[test]
    fn progress_payload_is_flat() {
        let ev = SuiteEvent::Progress(SuiteProgress {
            suite_run_id: "run-1".into(),
            suite_id: "suite".into(),
            current_device: "pixel".into(),
            current_scenario: "login".into(),
            device_progress: ProgressCounter { current: 1, total: 2 },
            scenario_progress: ProgressCounter { current: 3, total: 4 },
            overall_progress: 25.0,
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["topic"], "suite:progress");
        assert_eq!(json["overallProgress"], 25.0);
        assert_eq!(json["scenarioProgress"]["total"], 4);

        let back: SuiteEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.suite_run_id(), "run-1");
        assert!(!back.is_terminal());
    }
}
