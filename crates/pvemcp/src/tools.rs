//! MCP tool definitions and dispatch

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use pvemcp_api::{GuestCommandArgs, HostCommandArgs, JsonRpcError, ToolDefinition, ToolResult};
use pvemcp_core::{ExecutionCoordinator, GuestKind, Inventory, TargetKind};

use crate::format::{self, NodeFailure, NodeGuest};

const GET_NODES_DESC: &str = "List all nodes in the Proxmox cluster with their status, CPU, memory, and uptime.";

const GET_VMS_DESC: &str = "List all virtual machines across the cluster with their status and resource usage.";

const GET_CONTAINERS_DESC: &str = "List all LXC containers across the cluster with their status and resource usage.";

const EXECUTE_VM_COMMAND_DESC: &str = "Execute commands in a VM via QEMU guest agent.

Parameters:
node* - Host node name (e.g. 'pve1')
vmid* - VM ID number (e.g. '100')
command* - Shell command to run (e.g. 'uname -a')";

const EXECUTE_CONTAINER_COMMAND_DESC: &str = "Execute commands in an LXC container via SSH + pct exec.

Uses SSH to connect to the Proxmox host and executes 'pct exec {vmid} -- {command}'.
This is the recommended approach since Proxmox REST API doesn't support container exec.

Requirements:
- SSH configuration must be provided in config (optional ssh section)
- Container must be running
- SSH access to Proxmox host required
- User must have pct command permissions

Parameters:
node* - Host node name (e.g. 'pve1')
vmid* - Container ID number (e.g. '200')
command* - Shell command to run (e.g. 'uname -a')";

const EXECUTE_HOST_COMMAND_DESC: &str = "Execute commands directly on the Proxmox host via SSH.

Used for Proxmox management commands that run on the host itself, such as:
- pct stop {vmid} - Stop a container
- pct start {vmid} - Start a container
- pct list - List all containers
- qm stop {vmid} - Stop a VM

Requirements:
- SSH configuration must be provided in config
- SSH access to Proxmox host required
- User must have permissions for the commands

Parameters:
node* - Host node name (e.g. 'pve1', 'control')
command* - Command to run on host (e.g. 'pct stop 103')";

fn no_args_schema() -> Value {
    json!({"type": "object", "properties": {}, "required": []})
}

fn guest_command_schema(id_description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "node": {"type": "string", "description": "Host node name (e.g. 'pve1', 'proxmox-node2')"},
            "vmid": {"type": "string", "description": id_description},
            "command": {"type": "string", "description": "Shell command to run (e.g. 'uname -a', 'systemctl status nginx')"}
        },
        "required": ["node", "vmid", "command"]
    })
}

fn definition(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Every tool this server offers
#[must_use]
pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        definition("get_nodes", GET_NODES_DESC, no_args_schema()),
        definition("get_vms", GET_VMS_DESC, no_args_schema()),
        definition("get_containers", GET_CONTAINERS_DESC, no_args_schema()),
        definition(
            "execute_vm_command",
            EXECUTE_VM_COMMAND_DESC,
            guest_command_schema("VM ID number (e.g. '100', '101')"),
        ),
        definition(
            "execute_container_command",
            EXECUTE_CONTAINER_COMMAND_DESC,
            guest_command_schema("Container ID number (e.g. '200', '201')"),
        ),
        definition(
            "execute_host_command",
            EXECUTE_HOST_COMMAND_DESC,
            json!({
                "type": "object",
                "properties": {
                    "node": {"type": "string", "description": "Host node name (e.g. 'pve1', 'control')"},
                    "command": {"type": "string", "description": "Command to run on host (e.g. 'pct stop 103', 'pct list')"}
                },
                "required": ["node", "command"]
            }),
        ),
    ]
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T, JsonRpcError> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| JsonRpcError::invalid_params(format!("invalid arguments: {e}")))
}

/// Routes `tools/call` requests to the coordinator and the inventory
pub struct Tools {
    coordinator: Arc<ExecutionCoordinator>,
    inventory: Arc<dyn Inventory>,
}

impl Tools {
    pub fn new(coordinator: Arc<ExecutionCoordinator>, inventory: Arc<dyn Inventory>) -> Self {
        Self {
            coordinator,
            inventory,
        }
    }

    /// Run one tool
    ///
    /// # Errors
    /// Returns `INVALID_PARAMS` for an unknown tool or malformed arguments.
    /// Failures of the tool itself are reported in the result with `is_error`.
    #[instrument(skip(self, arguments))]
    pub async fn call(&self, name: &str, arguments: Value) -> Result<ToolResult, JsonRpcError> {
        match name {
            "execute_vm_command" => {
                let args: GuestCommandArgs = parse_args(arguments)?;
                Ok(self
                    .execute(TargetKind::Vm, &args.node, Some(&args.vmid), &args.command)
                    .await)
            }
            "execute_container_command" => {
                let args: GuestCommandArgs = parse_args(arguments)?;
                Ok(self
                    .execute(TargetKind::Container, &args.node, Some(&args.vmid), &args.command)
                    .await)
            }
            "execute_host_command" => {
                let args: HostCommandArgs = parse_args(arguments)?;
                Ok(self
                    .execute(TargetKind::Host, &args.node, None, &args.command)
                    .await)
            }
            "get_nodes" => Ok(self.nodes().await),
            "get_vms" => Ok(self.guests(GuestKind::Qemu).await),
            "get_containers" => Ok(self.guests(GuestKind::Lxc).await),
            other => Err(JsonRpcError::invalid_params(format!("Unknown tool: {other}"))),
        }
    }

    async fn execute(
        &self,
        kind: TargetKind,
        node: &str,
        vmid: Option<&str>,
        command: &str,
    ) -> ToolResult {
        info!(%kind, node, vmid, "executing command");
        let outcome = self
            .coordinator
            .execute_parts(kind, node, vmid, command)
            .await;
        let text = format::command_report(kind, node, vmid, command, &outcome);
        if outcome.is_success() {
            ToolResult::text(text)
        } else {
            ToolResult::error(text)
        }
    }

    async fn nodes(&self) -> ToolResult {
        match self.inventory.list_nodes().await {
            Ok(mut nodes) => {
                nodes.sort_by(|a, b| a.node.cmp(&b.node));
                ToolResult::text(format::node_list(&nodes))
            }
            Err(e) => {
                warn!(error = %e, "listing nodes failed");
                ToolResult::error(format!("Failed to list nodes: {e}"))
            }
        }
    }

    async fn guests(&self, kind: GuestKind) -> ToolResult {
        let nodes = match self.inventory.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "listing nodes failed");
                return ToolResult::error(format!("Failed to list nodes: {e}"));
            }
        };

        let mut guests = Vec::new();
        let mut failures = Vec::new();
        for entry in nodes {
            match self.inventory.list_guests(&entry.node, kind).await {
                Ok(list) => guests.extend(list.into_iter().map(|guest| NodeGuest {
                    node: entry.node.clone(),
                    guest,
                })),
                Err(e) => {
                    warn!(node = %entry.node, error = %e, "listing guests failed");
                    failures.push(NodeFailure {
                        node: entry.node,
                        reason: e.to_string(),
                    });
                }
            }
        }
        guests.sort_by_key(|g| g.guest.vmid);
        ToolResult::text(format::guest_list(kind, &guests, &failures))
    }
}
