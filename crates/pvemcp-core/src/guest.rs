//! Commands inside VMs through the guest agent

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::agent::{AgentExecStatus, GuestAgent};
use crate::config::{OutputEncoding, PollPolicy};
use crate::error::ExecFailure;
use crate::executor::Executor;
use crate::outcome::ExecutionOutcome;
use crate::poll::{Probe, poll_until};
use crate::target::{Target, Vmid};

/// Submits a command to a VM's guest agent and polls until it exits
pub struct GuestAgentExecutor {
    agent: Arc<dyn GuestAgent>,
    policy: PollPolicy,
    shell: Vec<String>,
    encoding: OutputEncoding,
}

impl GuestAgentExecutor {
    pub fn new(agent: Arc<dyn GuestAgent>, policy: PollPolicy) -> Self {
        Self {
            agent,
            policy,
            shell: vec!["/bin/sh".to_string(), "-c".to_string()],
            encoding: OutputEncoding::Plain,
        }
    }

    /// Interpreter argv the command string is appended to
    #[must_use]
    pub fn with_shell(mut self, shell: Vec<String>) -> Self {
        self.shell = shell;
        self
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: OutputEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn argv(&self, command: &str) -> Vec<String> {
        let mut argv = self.shell.clone();
        argv.push(command.to_string());
        argv
    }

    async fn execute(
        &self,
        node: &str,
        vmid: Vmid,
        command: &str,
    ) -> Result<ExecutionOutcome, ExecFailure> {
        let deadline = Instant::now()
            .checked_add(self.policy.budget)
            .ok_or_else(|| {
                ExecFailure::invalid(format!("poll budget {:?} is too large", self.policy.budget))
            })?;

        let task = self
            .agent
            .exec(node, vmid, &self.argv(command))
            .await
            .map_err(|e| ExecFailure::AgentUnreachable(e.to_string()))?;
        debug!(pid = task.pid, "guest command started");

        let agent = &self.agent;
        let status = poll_until(self.policy.interval, deadline, move || async move {
            match agent.exec_status(node, vmid, task.pid).await {
                Ok(status) if status.exited => Probe::Ready(status),
                Ok(_) => Probe::Pending,
                Err(e) => {
                    warn!(pid = task.pid, error = %e, "status poll failed, retrying");
                    Probe::Pending
                }
            }
        })
        .await
        .ok_or(ExecFailure::Timeout {
            what: "command",
            after: self.policy.budget,
        })?;

        self.finish(status)
    }

    fn finish(&self, status: AgentExecStatus) -> Result<ExecutionOutcome, ExecFailure> {
        let stdout = self.encoding.decode(status.out_data.as_deref())?;
        let stderr = self.encoding.decode(status.err_data.as_deref())?;
        if let Some(signal) = status.signal {
            debug!(signal, "guest command terminated by signal");
        }
        Ok(ExecutionOutcome::completed(status.exitcode, stdout, stderr))
    }
}

#[async_trait]
impl Executor for GuestAgentExecutor {
    #[instrument(skip(self, command), fields(target = %target))]
    async fn run(&self, target: &Target, command: &str) -> ExecutionOutcome {
        let Target::Vm { node, vmid } = target else {
            return ExecFailure::invalid(format!("{target} is not a VM")).into();
        };
        if command.trim().is_empty() {
            return ExecFailure::invalid("command must not be empty").into();
        }

        match self.execute(node, *vmid, command).await {
            Ok(outcome) => {
                debug!(exit_code = ?outcome.exit_code, "guest command finished");
                outcome
            }
            Err(failure) => {
                warn!(error = %failure, "guest command failed");
                failure.into()
            }
        }
    }

    fn name(&self) -> &'static str {
        "guest-agent"
    }
}
