//! Wiring of the API client, executors and coordinator from configuration

use std::sync::Arc;

use eyre::{Result, WrapErr};
use pvemcp_client::ProxmoxClient;
use pvemcp_core::{
    ContainerExec, ExecutionCoordinator, GuestAgentExecutor, Inventory, NodeAddresses,
    NotRunningClassifier, RemoteShellExecutor, TargetResolver,
};
use pvemcp_exec::{RemoteShell, SshShell};
use tracing::info;

use crate::config::Config;

/// Everything the MCP tools need
pub struct Services {
    pub inventory: Arc<dyn Inventory>,
    pub coordinator: Arc<ExecutionCoordinator>,
    pub ssh_enabled: bool,
}

/// Build the services described by `config`
///
/// Nothing here touches the network; connections are made per request.
///
/// # Errors
/// Returns error if the HTTP client, SSH credentials or exec patterns are invalid
pub fn build(config: &Config) -> Result<Services> {
    let client = Arc::new(
        ProxmoxClient::new(&config.client_options()).wrap_err("failed to create API client")?,
    );
    let inventory: Arc<dyn Inventory> = client.clone();

    let guest = GuestAgentExecutor::new(client, config.exec.poll_policy())
        .with_shell(config.exec.guest_shell.clone())
        .with_encoding(config.exec.guest_output_encoding);

    let shell: Option<Arc<dyn RemoteShell>> = match &config.ssh {
        Some(ssh) => {
            let shell = SshShell::new(ssh.settings()).wrap_err("failed to set up SSH")?;
            info!(user = %ssh.username, port = ssh.port, "SSH execution enabled");
            Some(Arc::new(shell))
        }
        None => {
            info!("no ssh section, container and host commands are disabled");
            None
        }
    };

    let addresses = NodeAddresses::new(
        config
            .ssh
            .as_ref()
            .map(|ssh| ssh.node_addresses.clone())
            .unwrap_or_default(),
    )
    .with_fallback(&config.proxmox.host);
    let use_sudo = config.ssh.as_ref().is_some_and(|ssh| ssh.use_sudo);
    let ssh_enabled = shell.is_some();

    let remote = RemoteShellExecutor::new(shell, inventory.clone())
        .with_addresses(addresses)
        .with_container_exec(ContainerExec::from_config(&config.exec).with_sudo(use_sudo))
        .with_classifier(NotRunningClassifier::from_config(&config.exec)?);

    let coordinator = ExecutionCoordinator::new(
        TargetResolver::new(inventory.clone()),
        Arc::new(guest),
        Arc::new(remote),
    );

    Ok(Services {
        inventory,
        coordinator: Arc::new(coordinator),
        ssh_enabled,
    })
}
