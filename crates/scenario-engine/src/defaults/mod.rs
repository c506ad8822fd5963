//! Default implementations of the collaborator traits.
//!
//! These let the engine start with zero external configuration. Each can
//! be replaced via the Engine builder.

pub mod in_memory_artifact_sink;
pub mod in_memory_result_store;
pub mod in_memory_store;
pub mod noop_video;
pub mod static_device_pool;
pub use in_memory_artifact_sink::InMemoryArtifactSink;
pub use in_memory_result_store::InMemoryResultStore;
pub use in_memory_store::{InMemoryScenarioStore, InMemorySuiteStore};
pub use noop_video::NoopVideoRecorder;
pub use static_device_pool::StaticDevicePool;
