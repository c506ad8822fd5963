//! Active-run registry and the mutable state of one suite run.
//!
//! The registry is an owned, cloneable handle rather than a global: the
//! [`Engine`](crate::engine::Engine) holds one and passes it to whatever
//! needs to query or stop a run. Device tasks update per-device progress
//! while status queries take snapshots concurrently.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::types::{ExecutionRequest, SuiteRunStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum DeviceRunStatus {
    Pending,
    Running,
    Completed,
    /// At least one scenario failed, or the device task aborted.
    PartiallyFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct DeviceProgress {
    /// 0-based index into the request's scenario ids.
    pub scenario_index: u32,
    /// 1-based repeat.
    pub repeat: u32,
    pub status: DeviceRunStatus,
    /// Slots finished or skipped on this device.
    #[serde(default)]
    pub completed_slots: u32,
}

impl Default for DeviceProgress {
    fn default() -> Self {
        Self {
            scenario_index: 0,
            repeat: 1,
            status: DeviceRunStatus::Pending,
            completed_slots: 0,
        }
    }
}

/// Mutable state of one suite run, shared by its device tasks.
#[derive(Debug)]
pub struct SuiteExecutionState {
    pub suite_run_id: String,
    pub suite_id: String,
    pub suite_name: String,
    pub request: ExecutionRequest,
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
    status: RwLock<SuiteRunStatus>,
    devices: RwLock<BTreeMap<String, DeviceProgress>>,
    completed_units: AtomicU64,
    total_units: u64,
}

impl SuiteExecutionState {
    pub fn new(
        suite_run_id: impl Into<String>,
        suite_id: impl Into<String>,
        suite_name: impl Into<String>,
        request: ExecutionRequest,
    ) -> Self {
        let devices = request
            .device_ids
            .iter()
            .map(|id| (id.clone(), DeviceProgress::default()))
            .collect();
        let total_units = request.device_ids.len() as u64 * u64::from(request.slots_per_device());
        Self {
            suite_run_id: suite_run_id.into(),
            suite_id: suite_id.into(),
            suite_name: suite_name.into(),
            request,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            status: RwLock::new(SuiteRunStatus::Created),
            devices: RwLock::new(devices),
            completed_units: AtomicU64::new(0),
            total_units,
        }
    }

    /// The run's stop token. Cloned into every device task.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Raise the stop flag. In-flight device calls are never aborted.
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> SuiteRunStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: SuiteRunStatus) {
        *self.status.write() = status;
    }

    pub fn update_device(&self, device_id: &str, f: impl FnOnce(&mut DeviceProgress)) {
        let mut devices = self.devices.write();
        f(devices.entry(device_id.to_string()).or_default());
    }

    pub fn device(&self, device_id: &str) -> Option<DeviceProgress> {
        self.devices.read().get(device_id).copied()
    }

    /// Count one finished or skipped scenario slot of `device_id`.
    /// Returns the new run-wide total.
    pub fn complete_slot(&self, device_id: &str) -> u64 {
        self.update_device(device_id, |p| p.completed_slots += 1);
        self.completed_units.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count every slot `device_id` has not reached as done. Used when a
    /// device task ends early so progress still reaches 100%. Returns the
    /// number of slots added.
    pub fn settle_device(&self, device_id: &str) -> u32 {
        let slots = self.request.slots_per_device();
        let mut remaining = 0;
        self.update_device(device_id, |p| {
            remaining = slots.saturating_sub(p.completed_slots);
            p.completed_slots = slots;
        });
        self.completed_units.fetch_add(u64::from(remaining), Ordering::Relaxed);
        remaining
    }

    pub fn completed_units(&self) -> u64 {
        self.completed_units.load(Ordering::Relaxed)
    }

    pub fn total_units(&self) -> u64 {
        self.total_units
    }

    /// Percentage of scenario slots done, `0.0..=100.0`.
    pub fn overall_progress(&self) -> f64 {
        if self.total_units == 0 {
            return 100.0;
        }
        (self.completed_units() as f64 / self.total_units as f64 * 100.0).min(100.0)
    }

    pub fn snapshot(&self) -> SuiteRunSnapshot {
        SuiteRunSnapshot {
            suite_run_id: self.suite_run_id.clone(),
            suite_id: self.suite_id.clone(),
            suite_name: self.suite_name.clone(),
            status: self.status(),
            stop_requested: self.is_stop_requested(),
            started_at: self.started_at,
            devices: self.devices.read().clone(),
            completed_units: self.completed_units(),
            total_units: self.total_units,
            overall_progress: self.overall_progress(),
            request: self.request.clone(),
        }
    }
}

/// Point-in-time view of a [`SuiteExecutionState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SuiteRunSnapshot {
    pub suite_run_id: String,
    pub suite_id: String,
    pub suite_name: String,
    pub status: SuiteRunStatus,
    pub stop_requested: bool,
    pub started_at: DateTime<Utc>,
    pub devices: BTreeMap<String, DeviceProgress>,
    pub completed_units: u64,
    pub total_units: u64,
    pub overall_progress: f64,
    pub request: ExecutionRequest,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Suite run id to live state, for runs that have not reached a terminal
/// status.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<String, Arc<SuiteExecutionState>>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, state: Arc<SuiteExecutionState>) {
        self.runs.write().insert(state.suite_run_id.clone(), state);
    }

    pub fn get(&self, suite_run_id: &str) -> Option<Arc<SuiteExecutionState>> {
        self.runs.read().get(suite_run_id).cloned()
    }

    pub fn remove(&self, suite_run_id: &str) -> Option<Arc<SuiteExecutionState>> {
        self.runs.write().remove(suite_run_id)
    }

    /// Raise the stop flag of a run. Returns `false` if the run is unknown
    /// or already finished.
    pub fn stop(&self, suite_run_id: &str) -> bool {
        match self.get(suite_run_id) {
            Some(state) => {
                state.request_stop();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, suite_run_id: &str) -> Option<SuiteRunSnapshot> {
        self.get(suite_run_id).map(|s| s.snapshot())
    }

    /// Snapshots of every active run, oldest first.
    pub fn active(&self) -> Vec<SuiteRunSnapshot> {
        let mut all: Vec<_> = self.runs.read().values().map(|s| s.snapshot()).collect();
        all.sort_by_key(|s| s.started_at);
        all
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: &str) -> Arc<SuiteExecutionState> {
        let request = ExecutionRequest::new(
            vec!["a".into(), "b".into()],
            vec!["s1".into(), "s2".into()],
        )
        .repeat_count(2);
        Arc::new(SuiteExecutionState::new(id, "suite", "Suite", request))
    }

    #[test]
    fn total_units_span_devices_scenarios_repeats() {
        let s = state("run-1");
        assert_eq!(s.total_units(), 8);
        assert_eq!(s.overall_progress(), 0.0);
        s.complete_slot("a");
        s.complete_slot("a");
        assert_eq!(s.overall_progress(), 25.0);
        assert_eq!(s.device("a").unwrap().completed_slots, 2);
    }

    #[test]
    fn settled_device_counts_only_unreached_slots() {
        let s = state("run-1");
        s.complete_slot("a");

        assert_eq!(s.settle_device("a"), 3);
        assert_eq!(s.settle_device("b"), 4);
        assert_eq!(s.settle_device("b"), 0);
        assert_eq!(s.completed_units(), s.total_units());
        assert_eq!(s.overall_progress(), 100.0);
    }

    #[test]
    fn stop_flags_registered_run() {
        let registry = RunRegistry::new();
        let s = state("run-1");
        registry.insert(s.clone());

        assert!(registry.stop("run-1"));
        assert!(s.is_stop_requested());
        assert!(s.cancel_token().is_cancelled());
        assert!(!registry.stop("missing"));
    }

    #[test]
    fn snapshot_reflects_device_updates() {
        let registry = RunRegistry::new();
        let s = state("run-1");
        registry.insert(s.clone());
        s.set_status(SuiteRunStatus::Running);
        s.update_device("a", |p| {
            p.scenario_index = 1;
            p.repeat = 2;
            p.status = DeviceRunStatus::Running;
        });

        let snap = registry.snapshot("run-1").unwrap();
        assert_eq!(snap.status, SuiteRunStatus::Running);
        assert_eq!(snap.devices["a"].scenario_index, 1);
        assert_eq!(snap.devices["a"].status, DeviceRunStatus::Running);
        assert_eq!(snap.devices["b"].status, DeviceRunStatus::Pending);
        assert!(!snap.stop_requested);
    }

    #[test]
    fn removed_runs_are_not_active() {
        let registry = RunRegistry::new();
        registry.insert(state("run-1"));
        registry.insert(state("run-2"));
        assert_eq!(registry.active().len(), 2);

        registry.remove("run-1");
        assert_eq!(registry.len(), 1);
        assert!(registry.get("run-1").is_none());
        assert!(registry.snapshot("run-2").is_some());
    }
}
