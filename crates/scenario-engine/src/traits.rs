//! Collaborator interfaces consumed by the engine.
//!
//! The engine never talks to a device, a database, or a file system
//! directly. Every external concern is one of these async traits, supplied
//! to [`EngineBuilder`](crate::engine::EngineBuilder). In-memory
//! implementations live in [`defaults`](crate::defaults).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::*;
use crate::retry::poll_until;
use crate::types::*;

// ---------------------------------------------------------------------------
// DeviceActionProvider
// ---------------------------------------------------------------------------

/// One device session. Each named action maps 1:1 to a method.
///
/// Immediate actions return once the device acknowledged the command;
/// the engine wraps them in bounded retry. Wait-class actions block until
/// a condition holds or the poll timeout elapses. Their default
/// implementations poll the probe methods ([`element_exists`],
/// [`text_exists`], [`find_image`]) with [`poll_until`], so a provider
/// only needs to override them when the device can wait natively.
///
/// Errors should be built with [`DeviceError::classify`] so the retry
/// predicate can tell transient failures from a dead session.
///
/// [`element_exists`]: Self::element_exists
/// [`text_exists`]: Self::text_exists
/// [`find_image`]: Self::find_image
#[async_trait]
pub trait DeviceActionProvider: Send + Sync {
    fn device_id(&self) -> &str;

    /// Platform, OS, and screen facts recorded on the device result.
    async fn environment(&self) -> Result<DeviceEnvironment, DeviceError>;

    /// Application under test, if the provider knows it.
    async fn app_info(&self) -> Result<Option<AppInfo>, DeviceError> {
        Ok(None)
    }

    // --- immediate actions ---

    async fn tap(&self, x: i32, y: i32) -> Result<ActionOutcome, DeviceError>;

    async fn tap_element(&self, selector: &Selector) -> Result<ActionOutcome, DeviceError>;

    async fn double_tap(&self, x: i32, y: i32) -> Result<ActionOutcome, DeviceError>;

    async fn long_press(
        &self,
        x: i32,
        y: i32,
        duration: Duration,
    ) -> Result<ActionOutcome, DeviceError>;

    async fn swipe(
        &self,
        from: (i32, i32),
        to: (i32, i32),
        duration: Duration,
    ) -> Result<ActionOutcome, DeviceError>;

    /// Type into the focused field, or into `selector` when given.
    async fn input_text(
        &self,
        text: &str,
        selector: Option<&Selector>,
    ) -> Result<ActionOutcome, DeviceError>;

    async fn press_key(&self, key: &str) -> Result<ActionOutcome, DeviceError>;

    async fn launch_app(&self, package: &str) -> Result<ActionOutcome, DeviceError>;

    async fn terminate_app(&self, package: &str) -> Result<ActionOutcome, DeviceError>;

    async fn clear_app_data(&self, package: &str) -> Result<ActionOutcome, DeviceError>;

    // --- probes ---

    async fn element_exists(&self, selector: &Selector) -> Result<bool, DeviceError>;

    async fn text_exists(&self, text: &str) -> Result<bool, DeviceError>;

    /// Locate `image` on the current screen. Returns `None` below the
    /// template's threshold.
    async fn find_image(&self, image: &ImageTemplate) -> Result<Option<ImageMatch>, DeviceError>;

    /// PNG bytes of the current screen.
    async fn screenshot(&self) -> Result<Vec<u8>, DeviceError>;

    // --- wait-class actions ---

    async fn wait_until_exists(
        &self,
        selector: &Selector,
        poll: PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<ActionOutcome, DeviceError> {
        wait_for_presence(cancel, poll, true, || self.element_exists(selector))
            .await
            .map(|o| o.or_message(format!("element {selector} did not appear")))
    }

    async fn wait_until_gone(
        &self,
        selector: &Selector,
        poll: PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<ActionOutcome, DeviceError> {
        wait_for_presence(cancel, poll, false, || self.element_exists(selector))
            .await
            .map(|o| o.or_message(format!("element {selector} is still present")))
    }

    async fn wait_until_text_exists(
        &self,
        text: &str,
        poll: PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<ActionOutcome, DeviceError> {
        wait_for_presence(cancel, poll, true, || self.text_exists(text))
            .await
            .map(|o| o.or_message(format!("text \"{text}\" did not appear")))
    }

    async fn wait_until_text_gone(
        &self,
        text: &str,
        poll: PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<ActionOutcome, DeviceError> {
        wait_for_presence(cancel, poll, false, || self.text_exists(text))
            .await
            .map(|o| o.or_message(format!("text \"{text}\" is still present")))
    }

    async fn wait_until_image(
        &self,
        image: &ImageTemplate,
        poll: PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<ActionOutcome, DeviceError> {
        let started = Instant::now();
        let outcome = poll_until(cancel, poll, || async {
            match self.find_image(image).await {
                Ok(found) => Ok(found),
                Err(e) if e.is_fatal() => Err(e),
                Err(_) => Ok(None),
            }
        })
        .await?;

        let mut performance = ActionPerformance {
            total_ms: elapsed_ms(started),
            waited_ms: Some(duration_ms(outcome.waited)),
            attempts: Some(outcome.iterations),
            match_confidence: None,
        };
        Ok(match outcome.result {
            Some(m) => {
                performance.match_confidence = Some(m.confidence);
                ActionOutcome::ok().with_performance(performance)
            }
            None => ActionOutcome::failed(format!(
                "image {} not found within {}ms",
                image.template, poll.timeout_ms
            ))
            .with_performance(performance),
        })
    }

    async fn wait_until_image_gone(
        &self,
        image: &ImageTemplate,
        poll: PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<ActionOutcome, DeviceError> {
        wait_for_presence(cancel, poll, false, || async {
            self.find_image(image).await.map(|m| m.is_some())
        })
        .await
        .map(|o| o.or_message(format!("image {} is still visible", image.template)))
    }
}

/// Poll a presence probe until it reports `want`.
///
/// Transient probe errors count as "not yet"; fatal ones abort the wait.
async fn wait_for_presence<F, Fut>(
    cancel: &CancellationToken,
    poll: PollPolicy,
    want: bool,
    mut probe: F,
) -> Result<ActionOutcome, DeviceError>
where
    F: FnMut() -> Fut + Send,
    Fut: std::future::Future<Output = Result<bool, DeviceError>> + Send,
{
    let started = Instant::now();
    let outcome = poll_until(cancel, poll, || {
        let fut = probe();
        async move {
            match fut.await {
                Ok(present) => Ok((present == want).then_some(())),
                Err(e) if e.is_fatal() => Err(e),
                Err(e) => {
                    tracing::trace!(error = %e, "probe failed, polling again");
                    Ok(None)
                }
            }
        }
    })
    .await?;

    let performance = ActionPerformance {
        total_ms: elapsed_ms(started),
        waited_ms: Some(duration_ms(outcome.waited)),
        attempts: Some(outcome.iterations),
        match_confidence: None,
    };
    let result = if outcome.success {
        ActionOutcome::ok()
    } else {
        ActionOutcome {
            success: false,
            message: Some(format!("timed out after {}ms", poll.timeout_ms)),
            performance: None,
        }
    };
    Ok(result.with_performance(performance))
}

impl ActionOutcome {
    /// Prefix a failure message with what was being waited for.
    fn or_message(mut self, what: String) -> Self {
        if !self.success {
            self.message = Some(match self.message.take() {
                Some(detail) => format!("{what}: {detail}"),
                None => what,
            });
        }
        self
    }
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn elapsed_ms(since: Instant) -> u64 {
    duration_ms(since.elapsed())
}

// ---------------------------------------------------------------------------
// DevicePool
// ---------------------------------------------------------------------------

/// Resolves a device id to its action provider.
pub trait DevicePool: Send + Sync {
    /// `None` when the device is unknown or disconnected.
    fn actions(&self, device_id: &str) -> Option<Arc<dyn DeviceActionProvider>>;

    /// Ids of every currently connected device.
    fn device_ids(&self) -> Vec<String> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Where scenario graphs come from.
#[async_trait]
pub trait ScenarioStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<ScenarioGraph>, StoreError>;
}

/// Where saved suite definitions come from.
#[async_trait]
pub trait SuiteStore: Send + Sync {
    async fn get_suite(&self, id: &str) -> Result<Option<Suite>, StoreError>;
}

/// Where finished suite results are persisted.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_result(&self, result: &SuiteExecutionResult) -> Result<(), ResultStoreError>;

    async fn get_result(&self, id: &str) -> Result<Option<SuiteExecutionResult>, ResultStoreError>;

    /// Newest first. `suite_id` filters to one suite.
    async fn list_results(
        &self,
        suite_id: Option<&str>,
    ) -> Result<Vec<SuiteExecutionResult>, ResultStoreError>;
}

// ---------------------------------------------------------------------------
// Artifacts and video
// ---------------------------------------------------------------------------

/// Receives screenshots captured during a run.
///
/// The engine registers a context for each device before its first
/// scenario and unregisters it once the device finishes, so a sink can
/// route artifacts to per-device report folders.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    fn register_context(&self, _ctx: &CorrelationContext) {}

    fn unregister_context(&self, _ctx: &CorrelationContext) {}

    async fn save(
        &self,
        ctx: &CorrelationContext,
        artifact: Artifact,
    ) -> Result<SavedArtifact, ArtifactError>;
}

/// Screen recording around each scenario walk.
#[async_trait]
pub trait VideoRecorder: Send + Sync {
    async fn start(&self, ctx: &CorrelationContext) -> VideoOutcome;

    async fn stop(&self, ctx: &CorrelationContext) -> VideoOutcome;
}
