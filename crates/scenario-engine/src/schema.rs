//! JSON Schema generation for the engine's wire types.
//!
//! This module is only available when the `schemars` feature is enabled.

use schemars::{schema_for, JsonSchema};
use serde_json::Value;
use std::collections::BTreeMap;

/// Generate JSON Schema for a single type.
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_default()
}

/// Generate every wire type's schema, keyed by type name.
pub fn all_schemas() -> BTreeMap<String, Value> {
    let mut schemas = BTreeMap::new();

    // scenario graphs
    schemas.insert("ScenarioGraph".into(), schema_of::<crate::ScenarioGraph>());
    schemas.insert("Node".into(), schema_of::<crate::Node>());
    schemas.insert("Connection".into(), schema_of::<crate::Connection>());
    schemas.insert("Action".into(), schema_of::<crate::Action>());
    schemas.insert("Condition".into(), schema_of::<crate::Condition>());
    schemas.insert("StepOptions".into(), schema_of::<crate::StepOptions>());

    // requests and config
    schemas.insert("Suite".into(), schema_of::<crate::Suite>());
    schemas.insert(
        "ExecutionRequest".into(),
        schema_of::<crate::ExecutionRequest>(),
    );
    schemas.insert("EngineConfig".into(), schema_of::<crate::EngineConfig>());
    schemas.insert("RetryPolicy".into(), schema_of::<crate::RetryPolicy>());
    schemas.insert("PollPolicy".into(), schema_of::<crate::PollPolicy>());

    // results
    schemas.insert("StepResult".into(), schema_of::<crate::StepResult>());
    schemas.insert("ScenarioResult".into(), schema_of::<crate::ScenarioResult>());
    schemas.insert("DeviceResult".into(), schema_of::<crate::DeviceResult>());
    schemas.insert(
        "SuiteExecutionResult".into(),
        schema_of::<crate::SuiteExecutionResult>(),
    );
    schemas.insert("SuiteStats".into(), schema_of::<crate::SuiteStats>());
    schemas.insert("DeviceStats".into(), schema_of::<crate::DeviceStats>());

    // live state
    schemas.insert("SuiteEvent".into(), schema_of::<crate::SuiteEvent>());
    schemas.insert(
        "SuiteRunSnapshot".into(),
        schema_of::<crate::SuiteRunSnapshot>(),
    );

    schemas
}
