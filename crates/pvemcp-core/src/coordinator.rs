//! Single entry point for command execution

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::error::ExecFailure;
use crate::executor::Executor;
use crate::outcome::{ExecutionOutcome, ExecutionRequest};
use crate::resolver::TargetResolver;
use crate::target::{Target, TargetKind};

/// Validates requests, resolves targets and routes them to an executor
///
/// VMs go to the guest-agent executor; containers and hosts go to the
/// remote-shell executor.
pub struct ExecutionCoordinator {
    resolver: TargetResolver,
    guest: Arc<dyn Executor>,
    shell: Arc<dyn Executor>,
}

impl ExecutionCoordinator {
    pub fn new(resolver: TargetResolver, guest: Arc<dyn Executor>, shell: Arc<dyn Executor>) -> Self {
        Self {
            resolver,
            guest,
            shell,
        }
    }

    /// Run one request; every failure is reported through the outcome
    #[instrument(skip_all, fields(target = %request.target))]
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        if request.command.trim().is_empty() {
            return ExecFailure::InvalidArgument("command must not be empty".into()).into();
        }

        let executor = self.executor_for(&request.target);
        if let Err(failure) = executor.ready(&request.target, &request.command) {
            warn!(executor = executor.name(), error = %failure, "executor unavailable");
            return failure.into();
        }

        if let Err(failure) = self.resolver.resolve_target(&request.target).await {
            warn!(error = %failure, "target rejected");
            return failure.into();
        }

        info!(executor = executor.name(), "executing command");
        let outcome = executor.run(&request.target, &request.command).await;
        info!(
            success = outcome.is_success(),
            exit_code = ?outcome.exit_code,
            "execution finished"
        );
        outcome
    }

    /// Parse raw tool arguments, then [`ExecutionCoordinator::execute`]
    pub async fn execute_parts(
        &self,
        kind: TargetKind,
        node: &str,
        identifier: Option<&str>,
        command: &str,
    ) -> ExecutionOutcome {
        match ExecutionRequest::parse(kind, node, identifier, command) {
            Ok(request) => self.execute(&request).await,
            Err(failure) => failure.into(),
        }
    }

    fn executor_for(&self, target: &Target) -> &Arc<dyn Executor> {
        match target {
            Target::Vm { .. } => &self.guest,
            Target::Container { .. } | Target::Host { .. } => &self.shell,
        }
    }
}
