//! Suite definitions and execution requests.

use serde::{Deserialize, Serialize};

/// Scheduling priority carried through to run state and results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Options shared by every device in a suite run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SuiteOptions {
    /// Times the whole scenario list is run per device. At least 1.
    #[serde(default = "default_repeat_count")]
    pub repeat_count: u32,
    /// Milliseconds to wait between consecutive scenarios on a device.
    #[serde(default)]
    pub scenario_interval: u64,
    #[serde(default)]
    pub record_video: bool,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            repeat_count: default_repeat_count(),
            scenario_interval: 0,
            record_video: false,
        }
    }
}

fn default_repeat_count() -> u32 {
    1
}

/// A named set of scenarios × devices run together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct Suite {
    pub id: String,
    pub name: String,
    pub scenario_ids: Vec<String>,
    pub device_ids: Vec<String>,
    #[serde(default)]
    pub options: SuiteOptions,
}

/// A caller's request to run scenarios on devices. Consumed once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub device_ids: Vec<String>,
    pub scenario_ids: Vec<String>,
    #[serde(default = "default_repeat_count")]
    pub repeat_count: u32,
    /// Milliseconds between scenarios.
    #[serde(default)]
    pub scenario_interval: u64,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_requester")]
    pub requester: String,
    #[serde(default)]
    pub record_video: bool,
}

fn default_requester() -> String {
    "local".into()
}

impl ExecutionRequest {
    pub fn new(device_ids: Vec<String>, scenario_ids: Vec<String>) -> Self {
        Self {
            device_ids,
            scenario_ids,
            repeat_count: default_repeat_count(),
            scenario_interval: 0,
            priority: Priority::default(),
            requester: default_requester(),
            record_video: false,
        }
    }

    pub fn repeat_count(mut self, count: u32) -> Self {
        self.repeat_count = count;
        self
    }

    pub fn scenario_interval(mut self, interval_ms: u64) -> Self {
        self.scenario_interval = interval_ms;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = requester.into();
        self
    }

    pub fn record_video(mut self, record: bool) -> Self {
        self.record_video = record;
        self
    }

    /// Build the request a stored suite describes.
    pub fn from_suite(suite: &Suite, requester: impl Into<String>) -> Self {
        Self {
            device_ids: suite.device_ids.clone(),
            scenario_ids: suite.scenario_ids.clone(),
            repeat_count: suite.options.repeat_count,
            scenario_interval: suite.options.scenario_interval,
            priority: Priority::default(),
            requester: requester.into(),
            record_video: suite.options.record_video,
        }
    }

    /// Total scenario slots each device executes.
    pub fn slots_per_device(&self) -> u32 {
        self.repeat_count
            .saturating_mul(self.scenario_ids.len() as u32)
    }
}
