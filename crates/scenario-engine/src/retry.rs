//! Bounded retry and poll-until, the substrate under every device call.
//!
//! Both primitives observe the run's [`CancellationToken`] at their
//! suspension points (between attempts, between polls, and while
//! sleeping) but never abort an in-flight operation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::Stopped;
use crate::types::{PollPolicy, RetryPolicy};

/// Sleep for `duration` unless the token fires first.
///
/// Returns `true` when the full duration elapsed, `false` when stopped.
pub async fn sleep_unless_stopped(cancel: &CancellationToken, duration: Duration) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if duration.is_zero() {
        return true;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

// ---------------------------------------------------------------------------
// Bounded retry
// ---------------------------------------------------------------------------

/// Run `op` up to `policy.max_attempts` times with a fixed delay.
///
/// `op` receives the 1-based attempt number. A failure is returned
/// unchanged, with no further attempts, when the token is cancelled, when
/// `is_retryable` rejects it, or when it came from the final attempt.
pub async fn retry<T, E, F, Fut, P>(
    cancel: &CancellationToken,
    policy: RetryPolicy,
    is_retryable: P,
    op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    retry_with_hook(cancel, policy, is_retryable, |_, _| {}, op).await
}

/// [`retry`] with an `on_retry(attempt, &error)` hook, called before each
/// backoff.
pub async fn retry_with_hook<T, E, F, Fut, P, H>(
    cancel: &CancellationToken,
    policy: RetryPolicy,
    is_retryable: P,
    mut on_retry: H,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    H: FnMut(u32, &E),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if cancel.is_cancelled() || attempt >= max_attempts || !is_retryable(&err) {
            return Err(err);
        }
        on_retry(attempt, &err);
        tracing::debug!(attempt, max_attempts, "retrying after retryable failure");
        if !sleep_unless_stopped(cancel, policy.delay()).await {
            return Err(err);
        }
        attempt += 1;
    }
}

// ---------------------------------------------------------------------------
// Poll-until
// ---------------------------------------------------------------------------

/// Result of [`poll_until`]. A timeout is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome<T> {
    pub success: bool,
    pub result: Option<T>,
    pub waited: Duration,
    /// Number of predicate calls.
    pub iterations: u32,
}

/// Call `predicate` until it yields `Some`, the timeout elapses, or the
/// token fires.
///
/// Cadence stays close to `policy.interval` regardless of predicate
/// latency: each pause is `interval - time spent in predicate`, floored
/// at zero. Predicate errors propagate immediately. Cancellation raises
/// [`Stopped`] through `E`.
pub async fn poll_until<T, E, F, Fut>(
    cancel: &CancellationToken,
    policy: PollPolicy,
    mut predicate: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: From<Stopped>,
{
    let started = Instant::now();
    let timeout = policy.timeout();
    let interval = policy.interval();
    let mut iterations = 0;

    while started.elapsed() < timeout {
        if cancel.is_cancelled() {
            return Err(Stopped.into());
        }
        let call_started = Instant::now();
        iterations += 1;
        if let Some(found) = predicate().await? {
            return Ok(PollOutcome {
                success: true,
                result: Some(found),
                waited: started.elapsed(),
                iterations,
            });
        }
        let pause = interval.saturating_sub(call_started.elapsed());
        if pause.is_zero() {
            tokio::task::yield_now().await;
        } else if !sleep_unless_stopped(cancel, pause).await {
            return Err(Stopped.into());
        }
    }

    Ok(PollOutcome {
        success: false,
        result: None,
        waited: started.elapsed(),
        iterations,
    })
}
