use async_trait::async_trait;

use crate::error::ExecFailure;
use crate::outcome::ExecutionOutcome;
use crate::target::Target;

/// Runs a command on an already-resolved target
///
/// Implementations never return an error: every failure is folded into the
/// outcome. Dropping the future abandons the wait, not the remote command.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, target: &Target, command: &str) -> ExecutionOutcome;

    /// Reject a request this executor can never serve, before any remote lookup
    fn ready(&self, _target: &Target, _command: &str) -> Result<(), ExecFailure> {
        Ok(())
    }

    /// Short name used in logs
    fn name(&self) -> &'static str;
}
