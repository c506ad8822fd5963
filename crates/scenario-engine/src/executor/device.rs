//! The per-device task: every repeat of every scenario, in order.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;

use super::dispatch::{ActionContext, ActionDispatcher};
use super::step::StepRunner;
use crate::config::EngineConfig;
use crate::errors::DeviceError;
use crate::events::{ProgressCounter, SuiteEvent, SuiteProgress};
use crate::registry::{DeviceRunStatus, SuiteExecutionState};
use crate::retry::sleep_unless_stopped;
use crate::traits::{ArtifactSink, DeviceActionProvider, VideoRecorder};
use crate::types::*;

/// Reason recorded on slots never started because of a stop request.
pub(crate) const SKIPPED_MESSAGE: &str = "skipped: execution stopped";

pub(crate) struct DeviceTask {
    pub state: Arc<SuiteExecutionState>,
    pub device: Arc<dyn DeviceActionProvider>,
    pub device_id: String,
    /// 1-based position among the run's devices.
    pub device_index: u32,
    pub scenarios: Arc<Vec<ScenarioGraph>>,
    pub dispatcher: ActionDispatcher,
    pub config: Arc<EngineConfig>,
    pub events: broadcast::Sender<SuiteEvent>,
    pub artifact_sink: Option<Arc<dyn ArtifactSink>>,
    pub video: Option<Arc<dyn VideoRecorder>>,
}

impl DeviceTask {
    /// Run every slot for this device.
    ///
    /// Returns `Err` only when the device cannot be prepared (its
    /// environment cannot be read); such a device contributes no
    /// [`DeviceResult`]. Scenario failures are data on the result.
    pub async fn run(self) -> Result<DeviceResult, DeviceError> {
        let suite_run_id = self.state.suite_run_id.clone();
        let environment = self.device.environment().await?;
        let app_info = match self.device.app_info().await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(device_id = %self.device_id, error = %e, "could not read app info");
                None
            }
        };

        tracing::info!(suite_run_id = %suite_run_id, device_id = %self.device_id, "device start");
        self.state.update_device(&self.device_id, |p| p.status = DeviceRunStatus::Running);
        self.emit(SuiteEvent::DeviceStart {
            suite_run_id: suite_run_id.clone(),
            device_id: self.device_id.clone(),
            timestamp: Utc::now(),
        });

        let correlation =
            CorrelationContext::for_device(&suite_run_id, &suite_run_id, &self.device_id);
        let registration = ContextRegistration::register(self.artifact_sink.clone(), &correlation);

        let mut result = DeviceResult::new(&self.device_id);
        result.environment = Some(environment);
        result.app_info = app_info;

        let runner = StepRunner {
            suite_run_id: suite_run_id.clone(),
            device: Arc::clone(&self.device),
            dispatcher: self.dispatcher.clone(),
            config: Arc::clone(&self.config),
            events: self.events.clone(),
        };
        let request = &self.state.request;
        let cancel = self.state.cancel_token().clone();
        let interval = Duration::from_millis(request.scenario_interval);
        let total_slots = request.slots_per_device();
        let mut slot = 0;

        for repeat in 1..=request.repeat_count {
            for (index, graph) in self.scenarios.iter().enumerate() {
                slot += 1;
                if cancel.is_cancelled() {
                    let mut skipped = ScenarioResult::skipped(&graph.id, repeat, SKIPPED_MESSAGE);
                    skipped.scenario_name = graph.name.clone();
                    result.push(skipped);
                    self.state.complete_slot(&self.device_id);
                    continue;
                }

                self.state.update_device(&self.device_id, |p| {
                    p.scenario_index = index as u32;
                    p.repeat = repeat;
                });
                tracing::info!(
                    suite_run_id = %suite_run_id,
                    device_id = %self.device_id,
                    scenario_id = %graph.id,
                    repeat,
                    "scenario start"
                );
                self.emit(SuiteEvent::ScenarioStart {
                    suite_run_id: suite_run_id.clone(),
                    device_id: self.device_id.clone(),
                    scenario_id: graph.id.clone(),
                    scenario_name: graph.name.clone(),
                    repeat,
                    timestamp: Utc::now(),
                });
                self.emit(SuiteEvent::Progress(SuiteProgress {
                    suite_run_id: suite_run_id.clone(),
                    suite_id: self.state.suite_id.clone(),
                    current_device: self.device_id.clone(),
                    current_scenario: graph.id.clone(),
                    device_progress: ProgressCounter {
                        current: self.device_index,
                        total: request.device_ids.len() as u32,
                    },
                    scenario_progress: ProgressCounter {
                        current: slot,
                        total: total_slots,
                    },
                    overall_progress: self.state.overall_progress(),
                }));

                let ctx = ActionContext {
                    correlation: correlation.for_scenario(&graph.id, repeat),
                    cancel: cancel.clone(),
                };
                let recording = self.start_video(&ctx.correlation).await;
                let mut scenario = runner.run_scenario(graph, &ctx, repeat).await;
                if recording {
                    scenario.video_path = self.stop_video(&ctx.correlation).await;
                }

                tracing::info!(
                    suite_run_id = %suite_run_id,
                    device_id = %self.device_id,
                    scenario_id = %graph.id,
                    repeat,
                    status = ?scenario.status,
                    duration_ms = scenario.duration_ms,
                    "scenario complete"
                );
                self.emit(SuiteEvent::ScenarioComplete {
                    suite_run_id: suite_run_id.clone(),
                    device_id: self.device_id.clone(),
                    result: scenario.clone(),
                });
                result.push(scenario);
                self.state.complete_slot(&self.device_id);

                if slot < total_slots && !interval.is_zero() {
                    sleep_unless_stopped(&cancel, interval).await;
                }
            }
        }

        drop(registration);
        let status = if result.stats.failed > 0 {
            DeviceRunStatus::PartiallyFailed
        } else {
            DeviceRunStatus::Completed
        };
        self.state.update_device(&self.device_id, |p| p.status = status);
        tracing::info!(
            suite_run_id = %suite_run_id,
            device_id = %self.device_id,
            passed = result.stats.passed,
            failed = result.stats.failed,
            skipped = result.stats.skipped,
            "device complete"
        );
        self.emit(SuiteEvent::DeviceComplete {
            suite_run_id,
            result: result.clone(),
        });
        Ok(result)
    }

    async fn start_video(&self, ctx: &CorrelationContext) -> bool {
        if !self.state.request.record_video {
            return false;
        }
        let Some(recorder) = &self.video else {
            return false;
        };
        let outcome = recorder.start(ctx).await;
        if !outcome.success {
            tracing::warn!(
                device_id = %self.device_id,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "video recording did not start"
            );
        }
        outcome.success
    }

    async fn stop_video(&self, ctx: &CorrelationContext) -> Option<String> {
        let recorder = self.video.as_ref()?;
        let outcome = recorder.stop(ctx).await;
        if !outcome.success {
            tracing::warn!(
                device_id = %self.device_id,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "video recording did not stop cleanly"
            );
            return None;
        }
        outcome.local_path
    }

    fn emit(&self, event: SuiteEvent) {
        let _ = self.events.send(event);
    }
}

/// Keeps a device's correlation context registered with the artifact sink
/// and unregisters it when dropped, including while a panicking device
/// task unwinds.
struct ContextRegistration {
    sink: Option<Arc<dyn ArtifactSink>>,
    correlation: CorrelationContext,
}

impl ContextRegistration {
    fn register(sink: Option<Arc<dyn ArtifactSink>>, correlation: &CorrelationContext) -> Self {
        if let Some(sink) = &sink {
            sink.register_context(correlation);
        }
        Self {
            sink,
            correlation: correlation.clone(),
        }
    }
}

impl Drop for ContextRegistration {
    fn drop(&mut self) {
        if let Some(sink) = &self.sink {
            sink.unregister_context(&self.correlation);
        }
    }
}
