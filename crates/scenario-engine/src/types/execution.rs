//! Step, scenario, device, and suite result records.
//!
//! The engine owns every record it builds. A [`ScenarioResult`] is built
//! incrementally during one graph walk and becomes immutable once it is
//! pushed onto its [`DeviceResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Waiting,
    Skipped,
}

/// Timing details reported by a device operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ActionPerformance {
    /// Wall time of the whole operation, retries included.
    pub total_ms: u64,
    /// Time spent polling, for wait-class actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waited_ms: Option<u64>,
    /// Device calls made (retry attempts or poll iterations).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Image match confidence, for image waits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_confidence: Option<f64>,
}

/// Normalized result of one device operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<ActionPerformance>,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            performance: None,
        }
    }

    pub fn with_performance(mut self, performance: ActionPerformance) -> Self {
        self.performance = Some(performance);
        self
    }
}

/// A template located on screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ImageMatch {
    pub confidence: f64,
    pub x: i32,
    pub y: i32,
}

/// One record per node visit (wait-class nodes record twice).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub node_id: String,
    pub node_name: String,
    pub action_type: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<ActionPerformance>,
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub scenario_id: String,
    #[serde(default)]
    pub scenario_name: String,
    /// 1-based repeat this execution belongs to.
    pub repeat: u32,
    pub status: ScenarioStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    #[serde(default)]
    pub screenshots: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
}

impl ScenarioResult {
    /// Placeholder for a slot that never ran because the suite was stopped.
    pub fn skipped(scenario_id: &str, repeat: u32, reason: &str) -> Self {
        let now = Utc::now();
        Self {
            scenario_id: scenario_id.to_string(),
            scenario_name: String::new(),
            repeat,
            status: ScenarioStatus::Skipped,
            started_at: now,
            completed_at: now,
            duration_ms: 0,
            error: Some(reason.to_string()),
            step_results: Vec::new(),
            screenshots: Vec::new(),
            video_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct DeviceStats {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl DeviceStats {
    pub fn record(&mut self, status: ScenarioStatus) {
        self.total += 1;
        match status {
            ScenarioStatus::Passed => self.passed += 1,
            ScenarioStatus::Failed => self.failed += 1,
            ScenarioStatus::Skipped => self.skipped += 1,
        }
    }
}

/// Static facts about the device a run executed on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct DeviceEnvironment {
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_height: Option<u32>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

/// Application under test, as reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct DeviceResult {
    pub device_id: String,
    pub scenario_results: Vec<ScenarioResult>,
    pub stats: DeviceStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<DeviceEnvironment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_info: Option<AppInfo>,
}

impl DeviceResult {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            scenario_results: Vec::new(),
            stats: DeviceStats::default(),
            environment: None,
            app_info: None,
        }
    }

    /// Append a finished scenario and fold it into the stats.
    pub fn push(&mut self, result: ScenarioResult) {
        self.stats.record(result.status);
        self.scenario_results.push(result);
    }
}

// ---------------------------------------------------------------------------
// Suites
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SuiteStats {
    pub total_scenarios: u32,
    pub total_devices: u32,
    pub total_executions: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl SuiteStats {
    /// Sum device stats into suite totals.
    pub fn aggregate(total_scenarios: u32, total_devices: u32, devices: &[DeviceResult]) -> Self {
        devices.iter().fold(
            Self {
                total_scenarios,
                total_devices,
                ..Self::default()
            },
            |mut acc, d| {
                acc.total_executions += d.stats.total;
                acc.passed += d.stats.passed;
                acc.failed += d.stats.failed;
                acc.skipped += d.stats.skipped;
                acc
            },
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum SuiteRunStatus {
    Created,
    Running,
    Completed,
    Stopped,
}

impl SuiteRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }
}

/// The terminal, persisted artifact of a suite run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SuiteExecutionResult {
    pub id: String,
    pub suite_id: String,
    pub suite_name: String,
    pub status: SuiteRunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub device_results: Vec<DeviceResult>,
    pub stats: SuiteStats,
}
