//! Request and result contract shared by every target kind

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ExecFailure};
use crate::target::{Target, TargetKind};

/// A command addressed to one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub target: Target,
    pub command: String,
}

impl ExecutionRequest {
    pub fn new(target: Target, command: impl Into<String>) -> Self {
        Self {
            target,
            command: command.into(),
        }
    }

    /// Build a request from raw tool arguments
    ///
    /// # Errors
    /// Returns `ExecFailure::InvalidArgument` for malformed node or identifier
    pub fn parse(
        kind: TargetKind,
        node: &str,
        identifier: Option<&str>,
        command: impl Into<String>,
    ) -> Result<Self, ExecFailure> {
        Ok(Self::new(Target::parse(kind, node, identifier)?, command))
    }
}

/// Whether the command could be run at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Uniform result of running a command on any target
///
/// `Success` means the command ran; its exit code may still be non-zero.
/// `Failure` means it never ran, or its completion could not be observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: OutcomeStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionOutcome {
    /// The command ran to completion
    pub fn completed(
        exit_code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            status: OutcomeStatus::Success,
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            error_message: None,
            error_kind: None,
        }
    }

    /// The command could not be run
    #[must_use]
    pub fn failure(failure: &ExecFailure) -> Self {
        Self {
            status: OutcomeStatus::Failure,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error_message: Some(failure.to_string()),
            error_kind: Some(failure.kind()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// Ran and exited with status 0
    #[must_use]
    pub fn exited_cleanly(&self) -> bool {
        self.is_success() && self.exit_code == Some(0)
    }
}

impl From<ExecFailure> for ExecutionOutcome {
    fn from(failure: ExecFailure) -> Self {
        Self::failure(&failure)
    }
}
