//! Failure taxonomy for command execution

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable tag for each failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    NotRunning,
    ConnectionFailure,
    AgentUnreachable,
    Timeout,
    Protocol,
}

/// Reasons a command could not be run at all
///
/// A command that ran and exited non-zero is never one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecFailure {
    /// Caller input rejected before any remote call
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown node, VM or container
    #[error("{0} not found")]
    NotFound(String),

    /// Target exists but cannot accept commands
    #[error("{target} is not running: {detail}")]
    NotRunning {
        /// Description of the target
        target: String,
        /// Observed state or the wrapper's message
        detail: String,
    },

    /// Transport could not be established (auth, network, host key)
    #[error("connection failed: {0}")]
    ConnectionFailure(String),

    /// Guest agent rejected or never received the command
    #[error("agent unreachable: {0}")]
    AgentUnreachable(String),

    /// No completion within the allowed time; the remote side may still be running
    #[error("{what} timed out after {after:?}")]
    Timeout {
        /// What was being waited on
        what: &'static str,
        /// Limit that was exceeded
        after: Duration,
    },

    /// Unexpected payload from the remote side
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ExecFailure {
    /// Category of this failure
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecFailure::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ExecFailure::NotFound(_) => ErrorKind::NotFound,
            ExecFailure::NotRunning { .. } => ErrorKind::NotRunning,
            ExecFailure::ConnectionFailure(_) => ErrorKind::ConnectionFailure,
            ExecFailure::AgentUnreachable(_) => ErrorKind::AgentUnreachable,
            ExecFailure::Timeout { .. } => ErrorKind::Timeout,
            ExecFailure::Protocol(_) => ErrorKind::Protocol,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ExecFailure::InvalidArgument(message.into())
    }
}

/// Invalid execution settings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);
