//! Engine-wide defaults, loadable from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{PollPolicy, RetryPolicy, StepOptions};

/// Errors loading an [`EngineConfig`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Defaults applied to every node unless the node's params override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Retry policy for immediate device actions.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Poll cadence for wait-class actions.
    #[serde(default)]
    pub poll: PollPolicy,
    /// Concurrent artifact saves across all devices. Default: 2.
    #[serde(default = "default_artifact_concurrency")]
    pub artifact_concurrency: usize,
    /// Broadcast buffer per run. Slow subscribers past this lag. Default: 1024.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Times a node may be visited in one walk. Default: 1.
    #[serde(default = "default_max_node_visits")]
    pub max_node_visits: u32,
    /// Take a screenshot when a step fails. Default: true.
    #[serde(default = "default_true")]
    pub capture_on_failure: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll: PollPolicy::default(),
            artifact_concurrency: default_artifact_concurrency(),
            event_capacity: default_event_capacity(),
            max_node_visits: default_max_node_visits(),
            capture_on_failure: true,
        }
    }
}

fn default_artifact_concurrency() -> usize {
    2
}
fn default_event_capacity() -> usize {
    1024
}
fn default_max_node_visits() -> u32 {
    1
}
fn default_true() -> bool {
    true
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn retry_for(&self, options: &StepOptions) -> RetryPolicy {
        self.retry.with_overrides(options)
    }

    pub fn poll_for(&self, options: &StepOptions) -> PollPolicy {
        self.poll.with_overrides(options)
    }
}
