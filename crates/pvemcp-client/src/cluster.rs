//! `Inventory` and `GuestAgent` backed by the Proxmox API

use async_trait::async_trait;
use tracing::debug;

use pvemcp_core::{
    AgentError, AgentExecStatus, GuestAgent, GuestAgentTask, GuestEntry, GuestKind, Inventory,
    InventoryError, NodeEntry, Vmid,
};

use crate::error::ClientError;
use crate::http::ProxmoxClient;

/// API messages meaning the agent cannot take commands right now
const AGENT_DOWN_MARKERS: &[&str] = &["guest agent", "not running", "got timeout"];

fn inventory_error(node: Option<&str>, error: ClientError) -> InventoryError {
    match (node, &error) {
        (Some(node), ClientError::Api { status, message })
            if *status == 404 || message.contains("does not exist") =>
        {
            InventoryError::NodeNotFound(node.to_string())
        }
        _ => InventoryError::Unavailable(error.to_string()),
    }
}

fn agent_error(error: ClientError) -> AgentError {
    match &error {
        ClientError::Api { message, .. }
            if AGENT_DOWN_MARKERS
                .iter()
                .any(|m| message.to_ascii_lowercase().contains(m)) =>
        {
            AgentError::NotResponding(message.clone())
        }
        _ => AgentError::Api(error.to_string()),
    }
}

#[async_trait]
impl Inventory for ProxmoxClient {
    async fn list_nodes(&self) -> Result<Vec<NodeEntry>, InventoryError> {
        self.nodes().await.map_err(|e| inventory_error(None, e))
    }

    async fn list_guests(
        &self,
        node: &str,
        kind: GuestKind,
    ) -> Result<Vec<GuestEntry>, InventoryError> {
        let guests = self
            .guests(node, kind)
            .await
            .map_err(|e| inventory_error(Some(node), e))?;
        Ok(guests.into_iter().map(Into::into).collect())
    }

    async fn node_address(&self, node: &str) -> Result<Option<String>, InventoryError> {
        let members = self
            .cluster_status()
            .await
            .map_err(|e| inventory_error(None, e))?;
        let address = members
            .into_iter()
            .find(|m| m.is_node() && m.name == node)
            .and_then(|m| m.ip);
        debug!(node, ?address, "node address from cluster status");
        Ok(address)
    }
}

#[async_trait]
impl GuestAgent for ProxmoxClient {
    async fn exec(
        &self,
        node: &str,
        vmid: Vmid,
        argv: &[String],
    ) -> Result<GuestAgentTask, AgentError> {
        let pid = self.agent_exec(node, vmid, argv).await.map_err(agent_error)?;
        Ok(GuestAgentTask::new(pid))
    }

    async fn exec_status(
        &self,
        node: &str,
        vmid: Vmid,
        pid: u64,
    ) -> Result<AgentExecStatus, AgentError> {
        let record = self
            .agent_exec_status(node, vmid, pid)
            .await
            .map_err(agent_error)?;
        Ok(record.into())
    }
}
