//! flowbridge - call Node, Deno or Bun flows synchronously from a load-test host
//!
//! This crate provides:
//! - The host-side dispatcher that spawns a guest runtime per call, enforces
//!   a deadline and classifies the outcome
//! - The wire codec shared with the embedded guest runner script
//! - Merging of guest-emitted metrics and checks into a typed metric registry
pub mod bridge;
pub mod codec;
pub mod collector;
pub mod command;
pub mod config;
pub mod context;
pub mod duration;
pub mod error;
pub mod guest;
pub mod merge;
pub mod metrics;
pub mod options;
pub mod runtime;

// Re-export commonly used types and traits
pub use bridge::{Bridge, PreparedCall};
pub use config::BridgeConfig;
pub use context::{ExecutionContext, HostState, StaticHost, UnitIdentity};
pub use error::{Error, FailureKind, Result};
pub use metrics::{MetricKind, MetricRegistry, Registry, Sample, SampleBuffer, SampleSink};
pub use options::CallRequest;
pub use runtime::Runtime;
