//! Guest-agent interface

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::target::Vmid;

/// Handle for a command started inside a guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestAgentTask {
    pub pid: u64,
    pub started_at: DateTime<Utc>,
}

impl GuestAgentTask {
    #[must_use]
    pub fn new(pid: u64) -> Self {
        Self {
            pid,
            started_at: Utc::now(),
        }
    }
}

/// Snapshot of a guest-agent command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentExecStatus {
    pub exited: bool,
    #[serde(default)]
    pub exitcode: Option<i32>,
    #[serde(default)]
    pub out_data: Option<String>,
    #[serde(default)]
    pub err_data: Option<String>,
    #[serde(default)]
    pub signal: Option<i32>,
}

impl AgentExecStatus {
    /// A status for a command that is still running
    #[must_use]
    pub fn running() -> Self {
        Self::default()
    }

    /// A status for a command that exited with `code`
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exited: true,
            exitcode: Some(code),
            out_data: Some(stdout.into()),
            err_data: Some(stderr.into()),
            signal: None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Agent not installed, not started, or the guest is off
    #[error("guest agent not responding: {0}")]
    NotResponding(String),

    /// The management API refused or failed the call
    #[error("api error: {0}")]
    Api(String),
}

/// Start commands inside VMs and read back their status
///
/// Dropping a pending call stops waiting; it does not stop a command already
/// started in the guest.
#[async_trait]
pub trait GuestAgent: Send + Sync {
    /// Start `argv` inside the guest
    async fn exec(
        &self,
        node: &str,
        vmid: Vmid,
        argv: &[String],
    ) -> Result<GuestAgentTask, AgentError>;

    /// Current state of a started command
    async fn exec_status(
        &self,
        node: &str,
        vmid: Vmid,
        pid: u64,
    ) -> Result<AgentExecStatus, AgentError>;
}
