//! Cluster inventory lookups

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Guest flavour as the cluster API names it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    Qemu,
    Lxc,
}

impl GuestKind {
    /// Path segment used by the cluster API
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GuestKind::Qemu => "qemu",
            GuestKind::Lxc => "lxc",
        }
    }
}

/// One cluster node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub node: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub mem: Option<u64>,
    #[serde(default)]
    pub maxmem: Option<u64>,
    #[serde(default)]
    pub uptime: Option<u64>,
}

impl NodeEntry {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            status: None,
            cpu: None,
            mem: None,
            maxmem: None,
            uptime: None,
        }
    }
}

/// One VM or container on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestEntry {
    pub vmid: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub mem: Option<u64>,
    #[serde(default)]
    pub maxmem: Option<u64>,
    #[serde(default)]
    pub cpus: Option<f64>,
}

impl GuestEntry {
    pub fn new(vmid: u32, status: impl Into<String>) -> Self {
        Self {
            vmid,
            name: None,
            status: status.into(),
            mem: None,
            maxmem: None,
            cpus: None,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status.eq_ignore_ascii_case("running")
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("inventory unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the cluster's nodes and guests
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Every node in the cluster
    async fn list_nodes(&self) -> Result<Vec<NodeEntry>, InventoryError>;

    /// Guests of one kind on `node`
    async fn list_guests(
        &self,
        node: &str,
        kind: GuestKind,
    ) -> Result<Vec<GuestEntry>, InventoryError>;

    /// Management address of `node`, if the cluster reports one
    async fn node_address(&self, node: &str) -> Result<Option<String>, InventoryError>;
}
