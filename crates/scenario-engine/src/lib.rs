//! Scenario engine: concurrent execution of graph-authored device tests.
//!
//! A scenario is a graph of UI actions and screen conditions. The engine
//! walks each scenario on each requested device, runs devices in parallel
//! and everything within a device sequentially, and settles every run into
//! a [`SuiteExecutionResult`] with per-step detail, live
//! [`SuiteEvent`]s and cooperative stop.
//!
//! The engine is designed to be embedded. Devices, stores, artifact
//! storage and video recording are collaborator traits in [`traits`];
//! in-memory versions live in [`defaults`].
#[cfg(feature = "schemars")]
pub mod schema;

pub mod artifacts;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod errors;
pub mod events;
pub mod executor;
pub mod registry;
pub mod retry;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod types;

// Re-export public types at the crate level.

// config
pub use config::{ConfigError, EngineConfig};

// defaults
pub use defaults::{
    InMemoryArtifactSink, InMemoryResultStore, InMemoryScenarioStore, InMemorySuiteStore,
    NoopVideoRecorder, StaticDevicePool,
};

// engine
pub use engine::{Engine, EngineBuilder, EngineError};

// errors
pub use errors::{ArtifactError, DeviceError, ResultStoreError, Stopped, StoreError};

// events
pub use events::{ProgressCounter, SuiteEvent, SuiteProgress};

// executor
pub use executor::{
    ActionContext, ExecutionCoordinator, ExecutorError, GraphNavigator, PreparedRun,
    SuiteRunHandle, ValidationError,
};

// registry
pub use registry::{
    DeviceProgress, DeviceRunStatus, RunRegistry, SuiteExecutionState, SuiteRunSnapshot,
};

// retry
pub use retry::{poll_until, retry, sleep_unless_stopped, PollOutcome};

// traits
pub use traits::{
    ArtifactSink, DeviceActionProvider, DevicePool, ResultStore, ScenarioStore, SuiteStore,
    VideoRecorder,
};

// types
pub use types::{
    Action, ActionKind, ActionOutcome, ActionParseError, ActionPerformance, AppInfo, Artifact,
    ArtifactKind, Condition, Connection, CorrelationContext, DeviceEnvironment, DeviceResult,
    DeviceStats, ExecutionRequest, ImageMatch, ImageTemplate, Node, NodeKind, PollPolicy,
    Priority, RetryPolicy, SavedArtifact, ScenarioGraph, ScenarioResult, ScenarioStatus, Selector,
    SelectorStrategy, StepOptions, StepResult, StepStatus, Suite, SuiteExecutionResult,
    SuiteOptions, SuiteRunStatus, SuiteStats, VideoOutcome,
};
