//! Remote shell trait

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::CommandResult;

/// Runs commands on a node's management address.
///
/// Dropping a returned future stops waiting for the command; it does not stop
/// the remote process.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `cmd` on `host`, bounded by `timeout` once connected
    async fn run_with_timeout(
        &self,
        host: &str,
        cmd: &str,
        timeout: Duration,
    ) -> Result<CommandResult, ExecError>;

    /// Timeout applied by [`RemoteShell::run`]
    fn default_timeout(&self) -> Duration;

    async fn run(&self, host: &str, cmd: &str) -> Result<CommandResult, ExecError> {
        self.run_with_timeout(host, cmd, self.default_timeout()).await
    }

    fn transport(&self) -> &'static str;
}
