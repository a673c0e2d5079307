//! Host-derived execution context handed read-only to each invocation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Identity of the execution unit making the call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitIdentity {
    pub id: u64,
    pub iteration: u64,
    pub scenario: String,
}

/// What the host engine exposes to the bridge about the calling unit
pub trait HostState: Send + Sync {
    /// Identity of the current execution unit
    fn unit(&self) -> UnitIdentity;

    /// Ambient tags applied to every sample pushed on behalf of this unit
    fn tags(&self) -> BTreeMap<String, String>;

    /// Ambient environment variables forwarded to the guest
    fn env(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Deadline of the surrounding call lifetime, if any
    fn deadline(&self) -> Option<Instant> {
        None
    }
}

/// Serialized form passed to the guest as the third positional argument
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(flatten)]
    pub unit: UnitIdentity,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ExecutionContext {
    /// Snapshot the host state right before an invocation
    pub fn capture(host: &dyn HostState) -> Self {
        Self {
            unit: host.unit(),
            env: host.env(),
        }
    }
}

/// A fixed host state, for the CLI and tests
#[derive(Debug, Clone, Default)]
pub struct StaticHost {
    pub unit: UnitIdentity,
    pub tags: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub deadline: Option<Instant>,
}

impl StaticHost {
    pub fn new(id: u64, scenario: impl Into<String>) -> Self {
        Self {
            unit: UnitIdentity {
                id,
                iteration: 0,
                scenario: scenario.into(),
            },
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl HostState for StaticHost {
    fn unit(&self) -> UnitIdentity {
        self.unit.clone()
    }

    fn tags(&self) -> BTreeMap<String, String> {
        self.tags.clone()
    }

    fn env(&self) -> BTreeMap<String, String> {
        self.env.clone()
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_serializes_flat() {
        let host = StaticHost::new(3, "checkout").with_env("BASE_URL", "http://localhost");
        let context = ExecutionContext::capture(&host);
        let value = serde_json::to_value(&context).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 3,
                "iteration": 0,
                "scenario": "checkout",
                "env": {"BASE_URL": "http://localhost"}
            })
        );
    }
}
