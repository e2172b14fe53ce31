//! Target validation against the cluster inventory

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::ExecFailure;
use crate::inventory::{GuestKind, Inventory, InventoryError};
use crate::target::{Target, TargetKind};

/// Confirms a target exists and can accept commands
pub struct TargetResolver {
    inventory: Arc<dyn Inventory>,
}

impl TargetResolver {
    pub fn new(inventory: Arc<dyn Inventory>) -> Self {
        Self { inventory }
    }

    /// Parse raw arguments and check the result against the inventory
    ///
    /// # Errors
    /// `InvalidArgument` for malformed input, `NotFound` or `NotRunning` for
    /// targets the cluster does not know or that are stopped, and
    /// `ConnectionFailure` when the inventory cannot be read.
    pub async fn resolve(
        &self,
        node: &str,
        identifier: Option<&str>,
        kind: TargetKind,
    ) -> Result<Target, ExecFailure> {
        let target = Target::parse(kind, node, identifier)?;
        self.resolve_target(&target).await?;
        Ok(target)
    }

    /// Check an already-parsed target
    ///
    /// # Errors
    /// See [`TargetResolver::resolve`]
    #[instrument(skip(self), fields(target = %target))]
    pub async fn resolve_target(&self, target: &Target) -> Result<(), ExecFailure> {
        let node = target.node();
        let nodes = self.inventory.list_nodes().await.map_err(lookup_failed)?;
        if !nodes.iter().any(|n| n.node == node) {
            return Err(ExecFailure::NotFound(format!("node {node}")));
        }

        let (guest_kind, vmid) = match target {
            Target::Host { .. } => return Ok(()),
            Target::Vm { vmid, .. } => (GuestKind::Qemu, *vmid),
            Target::Container { vmid, .. } => (GuestKind::Lxc, *vmid),
        };

        let guests = self
            .inventory
            .list_guests(node, guest_kind)
            .await
            .map_err(lookup_failed)?;
        let guest = guests
            .iter()
            .find(|g| g.vmid == vmid.get())
            .ok_or_else(|| ExecFailure::NotFound(target.to_string()))?;

        if !guest.is_running() {
            return Err(ExecFailure::NotRunning {
                target: target.to_string(),
                detail: format!("status is {}", guest.status),
            });
        }
        debug!("target resolved");
        Ok(())
    }
}

fn lookup_failed(error: InventoryError) -> ExecFailure {
    match error {
        InventoryError::NodeNotFound(node) => ExecFailure::NotFound(format!("node {node}")),
        InventoryError::Unavailable(reason) => {
            ExecFailure::ConnectionFailure(format!("inventory lookup failed: {reason}"))
        }
    }
}
