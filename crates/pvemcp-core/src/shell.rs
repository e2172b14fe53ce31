//! Commands on nodes and containers over a remote shell

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pvemcp_exec::{CommandResult, ExecError, RemoteShell};
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::config::ExecConfig;
use crate::error::{ConfigError, ExecFailure};
use crate::executor::Executor;
use crate::inventory::Inventory;
use crate::outcome::ExecutionOutcome;
use crate::target::{Target, Vmid};

/// Quote `s` as one POSIX shell word
#[must_use]
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// How a command is handed to a container through its host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerExec {
    tool: String,
    shell: Vec<String>,
    sudo: bool,
}

impl Default for ContainerExec {
    fn default() -> Self {
        Self::new("pct exec", vec!["/bin/sh".to_string(), "-c".to_string()])
    }
}

impl ContainerExec {
    pub fn new(tool: impl Into<String>, shell: Vec<String>) -> Self {
        Self {
            tool: tool.into(),
            shell,
            sudo: false,
        }
    }

    #[must_use]
    pub fn from_config(config: &ExecConfig) -> Self {
        Self::new(config.container_exec_tool.clone(), config.container_shell.clone())
    }

    /// Prefix the wrapper with `sudo`
    #[must_use]
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// Host command line that runs `command` inside container `vmid`
    ///
    /// The command is passed as a single quoted word so the host shell does
    /// not interpret it.
    #[must_use]
    pub fn wrap(&self, vmid: Vmid, command: &str) -> String {
        let mut line = String::new();
        if self.sudo {
            line.push_str("sudo ");
        }
        line.push_str(&format!("{} {vmid} --", self.tool));
        for part in &self.shell {
            line.push(' ');
            line.push_str(part);
        }
        line.push(' ');
        line.push_str(&shell_quote(command));
        line
    }
}

/// Recognizes the container wrapper's "not running" diagnostics
#[derive(Debug, Clone, Default)]
pub struct NotRunningClassifier {
    patterns: Vec<Regex>,
}

impl NotRunningClassifier {
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }

    /// # Errors
    /// Returns `ConfigError` if a configured pattern does not compile
    pub fn from_config(config: &ExecConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.not_running_patterns()?))
    }

    /// The stderr line that marks the container as stopped, if any
    #[must_use]
    pub fn classify<'a>(&self, stderr: &'a str) -> Option<&'a str> {
        stderr
            .lines()
            .find(|line| self.patterns.iter().any(|p| p.is_match(line)))
            .map(str::trim)
    }
}

/// Where each node's shell is reached
#[derive(Debug, Clone, Default)]
pub struct NodeAddresses {
    overrides: HashMap<String, String>,
    fallback: Option<String>,
}

impl NodeAddresses {
    pub fn new(overrides: HashMap<String, String>) -> Self {
        Self {
            overrides,
            fallback: None,
        }
    }

    /// Address used when neither an override nor the inventory knows the node
    #[must_use]
    pub fn with_fallback(mut self, host: impl Into<String>) -> Self {
        self.fallback = Some(host.into());
        self
    }

    /// Override, then the cluster's reported address, then the fallback, then the node name
    pub async fn resolve(&self, node: &str, inventory: &dyn Inventory) -> String {
        if let Some(address) = self.overrides.get(node) {
            return address.clone();
        }
        match inventory.node_address(node).await {
            Ok(Some(address)) => return address,
            Ok(None) => {}
            Err(e) => warn!(node, error = %e, "node address lookup failed"),
        }
        self.fallback.clone().unwrap_or_else(|| node.to_string())
    }
}

/// Runs host commands directly and container commands through the host's wrapper
pub struct RemoteShellExecutor {
    shell: Option<Arc<dyn RemoteShell>>,
    inventory: Arc<dyn Inventory>,
    addresses: NodeAddresses,
    container: ContainerExec,
    classifier: NotRunningClassifier,
}

impl RemoteShellExecutor {
    /// `shell` is `None` when no remote shell is configured; every run then fails
    pub fn new(shell: Option<Arc<dyn RemoteShell>>, inventory: Arc<dyn Inventory>) -> Self {
        Self {
            shell,
            inventory,
            addresses: NodeAddresses::default(),
            container: ContainerExec::default(),
            classifier: NotRunningClassifier::default(),
        }
    }

    #[must_use]
    pub fn with_addresses(mut self, addresses: NodeAddresses) -> Self {
        self.addresses = addresses;
        self
    }

    #[must_use]
    pub fn with_container_exec(mut self, container: ContainerExec) -> Self {
        self.container = container;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: NotRunningClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    fn not_configured(target: &Target, command: &str) -> ExecFailure {
        let manual = match target {
            Target::Container { node, vmid } => format!(
                " Alternative: ssh root@{node} {}",
                shell_quote(&format!("pct exec {vmid} -- {command}"))
            ),
            _ => String::new(),
        };
        ExecFailure::ConnectionFailure(format!(
            "SSH is not configured; add an `ssh` section to the configuration to run commands on {target}.{manual}"
        ))
    }

    fn interpret(&self, target: &Target, result: CommandResult) -> ExecutionOutcome {
        if matches!(target, Target::Container { .. }) && !result.success() {
            if let Some(line) = self.classifier.classify(&result.stderr) {
                return ExecFailure::NotRunning {
                    target: target.to_string(),
                    detail: line.to_string(),
                }
                .into();
            }
        }
        ExecutionOutcome::completed(result.status, result.stdout, result.stderr)
    }
}

fn transport_failure(error: ExecError) -> ExecFailure {
    match error {
        ExecError::Timeout { timeout } => ExecFailure::Timeout {
            what: "execution",
            after: timeout,
        },
        ExecError::ConnectionFailed(message) => ExecFailure::ConnectionFailure(message),
        other => ExecFailure::ConnectionFailure(other.to_string()),
    }
}

#[async_trait]
impl Executor for RemoteShellExecutor {
    #[instrument(skip(self, command), fields(target = %target))]
    async fn run(&self, target: &Target, command: &str) -> ExecutionOutcome {
        if command.trim().is_empty() {
            return ExecFailure::invalid("command must not be empty").into();
        }
        let Some(shell) = &self.shell else {
            warn!("remote shell not configured");
            return Self::not_configured(target, command).into();
        };

        let line = match target {
            Target::Container { vmid, .. } => self.container.wrap(*vmid, command),
            Target::Host { .. } => command.to_string(),
            Target::Vm { .. } => {
                return ExecFailure::invalid(format!("{target} is not reachable over a shell"))
                    .into();
            }
        };

        let address = self
            .addresses
            .resolve(target.node(), self.inventory.as_ref())
            .await;
        debug!(%address, transport = shell.transport(), "running remote command");

        match shell.run(&address, &line).await {
            Ok(result) => {
                debug!(status = ?result.status, duration = ?result.duration, "remote command finished");
                self.interpret(target, result)
            }
            Err(e) => {
                warn!(
                    %address,
                    error = %e,
                    may_have_started = !e.is_connection_failure(),
                    "remote command failed"
                );
                transport_failure(e).into()
            }
        }
    }

    fn ready(&self, target: &Target, command: &str) -> Result<(), ExecFailure> {
        if self.shell.is_none() {
            return Err(Self::not_configured(target, command));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "remote-shell"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{GuestEntry, GuestKind, InventoryError, NodeEntry};
    use std::time::Duration;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("whoami"), "'whoami'");
        assert_eq!(shell_quote("echo 'a b'"), r"'echo '\''a b'\'''");
        assert_eq!(shell_quote("$(id) ; ls"), "'$(id) ; ls'");
    }

    #[test]
    fn test_container_wrap() {
        let vmid = Vmid::new(200).unwrap();
        let wrap = ContainerExec::default();
        assert_eq!(wrap.wrap(vmid, "whoami"), "pct exec 200 -- /bin/sh -c 'whoami'");

        let wrap = wrap.with_sudo(true);
        assert_eq!(
            wrap.wrap(vmid, "cat /etc/os-release | head -1"),
            "sudo pct exec 200 -- /bin/sh -c 'cat /etc/os-release | head -1'"
        );
    }

    #[test]
    fn test_classifier_default_patterns() {
        let classifier = NotRunningClassifier::from_config(&ExecConfig::default()).unwrap();
        assert_eq!(
            classifier.classify("CT 200 not running\n"),
            Some("CT 200 not running")
        );
        assert_eq!(
            classifier.classify("warning: x\ncontainer '201' is not running"),
            Some("container '201' is not running")
        );
        assert_eq!(classifier.classify("grep: no such file"), None);
        assert_eq!(classifier.classify(""), None);
    }

    #[test]
    fn test_transport_failure_mapping() {
        let failure = transport_failure(ExecError::Timeout {
            timeout: Duration::from_secs(30),
        });
        assert_eq!(failure.to_string(), "execution timed out after 30s");

        let failure = transport_failure(ExecError::ConnectionFailed("refused".into()));
        assert_eq!(failure, ExecFailure::ConnectionFailure("refused".into()));
    }

    struct AddressBook;

    #[async_trait]
    impl Inventory for AddressBook {
        async fn list_nodes(&self) -> Result<Vec<NodeEntry>, InventoryError> {
            Ok(Vec::new())
        }

        async fn list_guests(
            &self,
            _node: &str,
            _kind: GuestKind,
        ) -> Result<Vec<GuestEntry>, InventoryError> {
            Ok(Vec::new())
        }

        async fn node_address(&self, node: &str) -> Result<Option<String>, InventoryError> {
            match node {
                "pve1" => Ok(Some("10.0.0.11".into())),
                "broken" => Err(InventoryError::Unavailable("503".into())),
                _ => Ok(None),
            }
        }
    }

    #[tokio::test]
    async fn test_address_resolution_order() {
        let overrides = HashMap::from([("pve2".to_string(), "pve2.mgmt".to_string())]);
        let addresses = NodeAddresses::new(overrides);

        assert_eq!(addresses.resolve("pve2", &AddressBook).await, "pve2.mgmt");
        assert_eq!(addresses.resolve("pve1", &AddressBook).await, "10.0.0.11");
        assert_eq!(addresses.resolve("pve3", &AddressBook).await, "pve3");

        let addresses = addresses.with_fallback("proxmox.lan");
        assert_eq!(addresses.resolve("broken", &AddressBook).await, "proxmox.lan");
    }

    #[tokio::test]
    async fn test_unconfigured_shell_suggests_manual_command() {
        let executor = RemoteShellExecutor::new(None, Arc::new(AddressBook));
        let target = Target::Container {
            node: "pve1".into(),
            vmid: Vmid::new(200).unwrap(),
        };

        let outcome = executor.run(&target, "uptime").await;

        assert!(!outcome.is_success());
        let message = outcome.error_message.unwrap();
        assert!(message.contains("ssh"));
        assert!(message.contains("ssh root@pve1 'pct exec 200 -- uptime'"));
    }

    /// Answers every command with the same result and counts calls
    struct FixedShell {
        result: Result<CommandResult, ExecError>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl FixedShell {
        fn new(result: Result<CommandResult, ExecError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: std::sync::atomic::AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteShell for FixedShell {
        async fn run_with_timeout(
            &self,
            _host: &str,
            _cmd: &str,
            _timeout: Duration,
        ) -> Result<CommandResult, ExecError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.result.clone()
        }

        fn default_timeout(&self) -> Duration {
            Duration::from_secs(30)
        }

        fn transport(&self) -> &'static str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_dropped_channel_is_connection_failure() {
        let shell = FixedShell::new(Err(ExecError::IoError(
            "channel closed without exit status".into(),
        )));
        let executor = RemoteShellExecutor::new(Some(shell.clone()), Arc::new(AddressBook));
        let target = Target::Host {
            node: "pve1".into(),
        };

        let outcome = executor.run(&target, "apt-get update").await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.error_kind, Some(crate::error::ErrorKind::ConnectionFailure));
        assert!(
            outcome
                .error_message
                .unwrap()
                .contains("channel closed without exit status")
        );
        assert_eq!(shell.calls(), 1);
    }

    #[tokio::test]
    async fn test_blank_command_never_reaches_shell() {
        let shell = FixedShell::new(Ok(CommandResult {
            status: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
        }));
        let executor = RemoteShellExecutor::new(Some(shell.clone()), Arc::new(AddressBook));
        let target = Target::Host {
            node: "pve1".into(),
        };

        let outcome = executor.run(&target, "   ").await;

        assert_eq!(outcome.error_kind, Some(crate::error::ErrorKind::InvalidArgument));
        assert_eq!(shell.calls(), 0);
    }
}
