//! The runner program executed inside the guest runtime

/// Source of the guest runner, passed inline or on stdin depending on the runtime
pub const RUNNER_SCRIPT: &str = include_str!("runner.js");

/// Environment channel for runtimes that do not take the positional arguments reliably
pub const ENV_ENTRY: &str = "FLOWBRIDGE_ENTRY";
pub const ENV_PAYLOAD: &str = "FLOWBRIDGE_PAYLOAD";
pub const ENV_CONTEXT: &str = "FLOWBRIDGE_CONTEXT";
/// Module resolution strategy hint (`path` or `specifier`)
pub const ENV_RESOLUTION: &str = "FLOWBRIDGE_RESOLUTION";
