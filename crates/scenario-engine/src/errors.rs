//! Error types for collaborator traits and the retry substrate.

use thiserror::Error;

/// Phrases that mark a device session as gone. Never retried.
const FATAL_PHRASES: &[&str] = &[
    "invalid session id",
    "session not created",
    "session is either terminated or not started",
    "session terminated",
    "session has been terminated",
    "instrumentation process is not running",
    "device not found",
    "device offline",
];

/// Phrases that mark a device error as worth another attempt.
const TRANSIENT_PHRASES: &[&str] = &[
    "no such element",
    "element not found",
    "stale element reference",
    "timeout",
    "timed out",
    "connection refused",
    "econnrefused",
    "econnreset",
    "socket hang up",
    "could not proxy command",
];

fn contains_any(message: &str, phrases: &[&str]) -> bool {
    let lower = message.to_ascii_lowercase();
    phrases.iter().any(|p| lower.contains(p))
}

/// Whether a message names a terminated device session.
pub fn is_fatal_message(message: &str) -> bool {
    contains_any(message, FATAL_PHRASES)
}

/// Whether a message names a transient device condition.
pub fn is_transient_message(message: &str) -> bool {
    !is_fatal_message(message) && contains_any(message, TRANSIENT_PHRASES)
}

/// Errors raised by [`DeviceActionProvider`](crate::traits::DeviceActionProvider)
/// calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceError {
    /// Element not found, stale element, timeout, refused connection.
    #[error("{message}")]
    Transient { message: String },
    /// The device session crashed or was terminated.
    #[error("session terminated: {message}")]
    Fatal { message: String },
    /// Unclassified provider failure.
    #[error("{message}")]
    Other { message: String },
    /// The suite run was stopped while the call was pending.
    #[error("execution stopped")]
    Stopped,
}

impl DeviceError {
    /// Classify a raw provider message with the fatal and transient phrase
    /// lists. Fatal phrases win over transient ones.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_fatal_message(&message) {
            Self::Fatal { message }
        } else if is_transient_message(&message) {
            Self::Transient { message }
        } else {
            Self::Other { message }
        }
    }

    /// Default retry predicate: transient errors only. Unclassified errors
    /// are retried only when their message matches a transient phrase.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient { .. } => true,
            Self::Other { message } => is_transient_message(message),
            Self::Fatal { .. } | Self::Stopped => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Fatal { .. } => true,
            Self::Other { message } => is_fatal_message(message),
            _ => false,
        }
    }
}

impl From<Stopped> for DeviceError {
    fn from(_: Stopped) -> Self {
        Self::Stopped
    }
}

/// Raised by poll-until when the stop token is observed.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("execution stopped")]
pub struct Stopped;

/// Errors from [`ScenarioStore`](crate::traits::ScenarioStore) and
/// [`SuiteStore`](crate::traits::SuiteStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {id}")]
    NotFound { id: String },
    #[error("store error: {message}")]
    Store { message: String },
}

/// Errors from [`ResultStore`](crate::traits::ResultStore).
#[derive(Debug, Error)]
pub enum ResultStoreError {
    #[error("result not found: {id}")]
    NotFound { id: String },
    #[error("result store error: {message}")]
    Store { message: String },
}

/// Errors from [`ArtifactSink`](crate::traits::ArtifactSink).
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact write failed: {message}")]
    Write { message: String },
    #[error("artifact queue closed")]
    QueueClosed,
}
