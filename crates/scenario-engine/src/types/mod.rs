//! Foundational types for the scenario execution model.
//!
//! Every type here is `Serialize + Deserialize + Debug + Clone`. Map fields
//! use `BTreeMap` so serialized graphs and results are deterministic.

pub mod action;
pub mod artifact;
pub mod execution;
pub mod graph;
pub mod suite;

pub use action::*;
pub use artifact::*;
pub use execution::*;
pub use graph::*;
pub use suite::*;

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Retry and polling policies
// ---------------------------------------------------------------------------

/// Fixed-delay bounded retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct RetryPolicy {
    /// Total attempts (1 = no retry). Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds. Default: 500.
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Apply per-node overrides.
    pub fn with_overrides(self, options: &StepOptions) -> Self {
        Self {
            max_attempts: options.retry_count.unwrap_or(self.max_attempts),
            delay_ms: options.retry_delay.unwrap_or(self.delay_ms),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    500
}

/// Poll-until cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct PollPolicy {
    /// Give up after this many milliseconds. Default: 10 000.
    #[serde(default = "default_poll_timeout_ms")]
    pub timeout_ms: u64,
    /// Target time between predicate calls. Default: 500.
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_poll_timeout_ms(),
            interval_ms: default_poll_interval_ms(),
        }
    }
}

impl PollPolicy {
    pub fn new(timeout_ms: u64, interval_ms: u64) -> Self {
        Self {
            timeout_ms,
            interval_ms,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Apply per-node overrides.
    pub fn with_overrides(self, options: &StepOptions) -> Self {
        Self {
            timeout_ms: options.timeout.unwrap_or(self.timeout_ms),
            interval_ms: options.interval.unwrap_or(self.interval_ms),
        }
    }
}

fn default_poll_timeout_ms() -> u64 {
    10_000
}
fn default_poll_interval_ms() -> u64 {
    500
}
