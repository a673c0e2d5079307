use std::io;

use crate::runtime::Runtime;

/// Broad classification of a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Bad arguments; no process was spawned
    Caller,
    /// The deadline fired and the child was killed
    Timeout,
    /// The child exited non-zero or never started
    Execution,
    /// The child exited zero but its result could not be read
    Protocol,
    /// Registry, configuration or I/O trouble on the host side
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Caller => "caller",
            FailureKind::Timeout => "timeout",
            FailureKind::Execution => "execution",
            FailureKind::Protocol => "protocol",
            FailureKind::Internal => "internal",
        }
    }
}

/// Errors that can occur while dispatching a flow
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("failed to marshal payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid timeout value {value:?}: {reason}")]
    InvalidTimeout { value: String, reason: String },

    #[error("unsupported runtime {0:?} (supported: {list})", list = Runtime::supported_list())]
    UnsupportedRuntime(String),

    #[error("{runtime} runtime timed out after {timeout} (entry={entry})\nOutput: {output}")]
    Timeout {
        runtime: Runtime,
        entry: String,
        timeout: String,
        output: String,
    },

    #[error("failed to execute {runtime} flow (entry={entry}): {reason}\nOutput: {output}")]
    Execution {
        runtime: Runtime,
        entry: String,
        reason: String,
        output: String,
    },

    #[error(
        "{runtime} flow (entry={entry}) exited cleanly but broke the result protocol: {reason}\nOutput: {output}"
    )]
    Protocol {
        runtime: Runtime,
        entry: String,
        reason: String,
        output: String,
    },

    #[error("metric registry error: {0}")]
    Registry(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::InvalidOptions(_)
            | Error::Serialization(_)
            | Error::InvalidTimeout { .. }
            | Error::UnsupportedRuntime(_) => FailureKind::Caller,
            Error::Timeout { .. } => FailureKind::Timeout,
            Error::Execution { .. } => FailureKind::Execution,
            Error::Protocol { .. } => FailureKind::Protocol,
            Error::Registry(_) | Error::Config(_) | Error::Io(_) => FailureKind::Internal,
        }
    }

    /// Captured child output, for the variants that spawned a process
    pub fn output(&self) -> Option<&str> {
        match self {
            Error::Timeout { output, .. }
            | Error::Execution { output, .. }
            | Error::Protocol { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Result type alias for flowbridge operations
pub type Result<T> = std::result::Result<T, Error>;
