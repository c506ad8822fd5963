//! Suite-level run: fan out one task per device, settle all, aggregate.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;

use super::device::DeviceTask;
use super::{ExecutionCoordinator, PreparedRun};
use crate::events::SuiteEvent;
use crate::registry::DeviceRunStatus;
use crate::types::*;

pub(super) async fn execute_run(
    coordinator: ExecutionCoordinator,
    run: PreparedRun,
) -> SuiteExecutionResult {
    let PreparedRun {
        state,
        scenarios,
        devices,
    } = run;
    let suite_run_id = state.suite_run_id.clone();
    let request = state.request.clone();

    state.set_status(SuiteRunStatus::Running);
    tracing::info!(
        suite_run_id = %suite_run_id,
        suite_id = %state.suite_id,
        devices = request.device_ids.len(),
        scenarios = request.scenario_ids.len(),
        repeat_count = request.repeat_count,
        requester = %request.requester,
        "suite run start"
    );
    coordinator.emit(SuiteEvent::Start {
        suite_run_id: suite_run_id.clone(),
        suite_id: state.suite_id.clone(),
        suite_name: state.suite_name.clone(),
        device_ids: request.device_ids.clone(),
        scenario_ids: request.scenario_ids.clone(),
        repeat_count: request.repeat_count,
        timestamp: Utc::now(),
    });

    // One task per device. A panic or early error in one task never
    // touches its siblings: join_all waits for every handle.
    let handles: Vec<_> = devices
        .into_iter()
        .enumerate()
        .map(|(i, (device_id, device))| {
            let task = DeviceTask {
                state: Arc::clone(&state),
                device,
                device_id: device_id.clone(),
                device_index: i as u32 + 1,
                scenarios: Arc::clone(&scenarios),
                dispatcher: coordinator.dispatcher.clone(),
                config: Arc::clone(&coordinator.config),
                events: coordinator.events.clone(),
                artifact_sink: coordinator.artifact_sink.clone(),
                video: coordinator.video.clone(),
            };
            (device_id, tokio::spawn(task.run()))
        })
        .collect();
    let (device_ids, joins): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
    let settled = join_all(joins).await;

    let mut device_results = Vec::with_capacity(settled.len());
    for (device_id, joined) in device_ids.into_iter().zip(settled) {
        match joined {
            Ok(Ok(result)) => {
                device_results.push(result);
                continue;
            }
            Ok(Err(e)) => {
                tracing::error!(suite_run_id = %suite_run_id, device_id = %device_id, error = %e, "device task aborted");
            }
            Err(e) => {
                tracing::error!(suite_run_id = %suite_run_id, device_id = %device_id, error = %e, "device task panicked");
            }
        }
        // Slots the device never reached still count toward progress.
        state.settle_device(&device_id);
        state.update_device(&device_id, |p| p.status = DeviceRunStatus::PartiallyFailed);
    }

    let stopped = state.is_stop_requested();
    let status = if stopped {
        SuiteRunStatus::Stopped
    } else {
        SuiteRunStatus::Completed
    };
    let completed_at = Utc::now();
    let result = SuiteExecutionResult {
        id: suite_run_id.clone(),
        suite_id: state.suite_id.clone(),
        suite_name: state.suite_name.clone(),
        status,
        started_at: state.started_at,
        completed_at,
        total_duration_ms: u64::try_from(
            (completed_at - state.started_at).num_milliseconds().max(0),
        )
        .unwrap_or(0),
        stats: SuiteStats::aggregate(
            request.scenario_ids.len() as u32,
            request.device_ids.len() as u32,
            &device_results,
        ),
        device_results,
    };
    state.set_status(status);

    if let Some(store) = &coordinator.results {
        if let Err(e) = store.save_result(&result).await {
            tracing::warn!(suite_run_id = %suite_run_id, error = %e, "failed to persist suite result");
        }
    }
    coordinator.registry.remove(&suite_run_id);

    tracing::info!(
        suite_run_id = %suite_run_id,
        status = ?status,
        passed = result.stats.passed,
        failed = result.stats.failed,
        skipped = result.stats.skipped,
        duration_ms = result.total_duration_ms,
        "suite run complete"
    );
    let event = if stopped {
        SuiteEvent::Stopped {
            suite_run_id,
            result: result.clone(),
        }
    } else {
        SuiteEvent::Complete {
            suite_run_id,
            result: result.clone(),
        }
    };
    coordinator.emit(event);
    result
}
