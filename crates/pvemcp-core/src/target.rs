//! Execution targets

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ExecFailure;

/// Numeric VM/container identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vmid(u32);

impl Vmid {
    /// Wrap a raw id, rejecting zero
    ///
    /// # Errors
    /// Returns `ExecFailure::InvalidArgument` for `0`
    pub fn new(id: u32) -> Result<Self, ExecFailure> {
        if id == 0 {
            return Err(ExecFailure::invalid("vmid must be a positive integer"));
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl FromStr for Vmid {
    type Err = ExecFailure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .trim()
            .parse::<u32>()
            .map_err(|_| ExecFailure::invalid(format!("vmid must be numeric, got {s:?}")))?;
        Self::new(id)
    }
}

impl fmt::Display for Vmid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which kind of destination a command is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Vm,
    Container,
    Host,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetKind::Vm => "vm",
            TargetKind::Container => "container",
            TargetKind::Host => "host",
        };
        f.write_str(s)
    }
}

/// Destination of a command
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Target {
    /// QEMU virtual machine, reached through its guest agent
    Vm { node: String, vmid: Vmid },
    /// LXC container, reached through the host's container-exec wrapper
    Container { node: String, vmid: Vmid },
    /// The node itself
    Host { node: String },
}

impl Target {
    /// Build a target from raw caller input
    ///
    /// `identifier` is required for VMs and containers and ignored for hosts.
    ///
    /// # Errors
    /// Returns `ExecFailure::InvalidArgument` for a malformed node name or identifier
    pub fn parse(
        kind: TargetKind,
        node: &str,
        identifier: Option<&str>,
    ) -> Result<Self, ExecFailure> {
        validate_node(node)?;
        let node = node.to_string();

        let vmid = || -> Result<Vmid, ExecFailure> {
            identifier
                .ok_or_else(|| ExecFailure::invalid(format!("a vmid is required for a {kind} target")))?
                .parse()
        };

        Ok(match kind {
            TargetKind::Vm => Target::Vm { node, vmid: vmid()? },
            TargetKind::Container => Target::Container { node, vmid: vmid()? },
            TargetKind::Host => Target::Host { node },
        })
    }

    #[must_use]
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Vm { .. } => TargetKind::Vm,
            Target::Container { .. } => TargetKind::Container,
            Target::Host { .. } => TargetKind::Host,
        }
    }

    #[must_use]
    pub fn node(&self) -> &str {
        match self {
            Target::Vm { node, .. } | Target::Container { node, .. } | Target::Host { node } => {
                node
            }
        }
    }

    #[must_use]
    pub fn vmid(&self) -> Option<Vmid> {
        match self {
            Target::Vm { vmid, .. } | Target::Container { vmid, .. } => Some(*vmid),
            Target::Host { .. } => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Vm { node, vmid } => write!(f, "VM {vmid} on node {node}"),
            Target::Container { node, vmid } => write!(f, "container {vmid} on node {node}"),
            Target::Host { node } => write!(f, "host {node}"),
        }
    }
}

fn validate_node(node: &str) -> Result<(), ExecFailure> {
    if node.is_empty() {
        return Err(ExecFailure::invalid("node name must not be empty"));
    }
    if !node
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ExecFailure::invalid(format!("invalid node name {node:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vm() {
        let target = Target::parse(TargetKind::Vm, "pve1", Some("100")).unwrap();
        assert_eq!(target.kind(), TargetKind::Vm);
        assert_eq!(target.node(), "pve1");
        assert_eq!(target.vmid().map(Vmid::get), Some(100));
        assert_eq!(target.to_string(), "VM 100 on node pve1");
    }

    #[test]
    fn test_parse_host_ignores_identifier() {
        let target = Target::parse(TargetKind::Host, "pve-2.lan", Some("100")).unwrap();
        assert_eq!(target, Target::Host { node: "pve-2.lan".into() });
        assert_eq!(target.vmid(), None);
    }

    #[test]
    fn test_malformed_identifiers() {
        for bad in ["", "abc", "-1", "0", "1e3"] {
            let err = Target::parse(TargetKind::Container, "pve1", Some(bad)).unwrap_err();
            assert!(matches!(err, ExecFailure::InvalidArgument(_)), "{bad:?} accepted");
        }

        let err = Target::parse(TargetKind::Vm, "pve1", None).unwrap_err();
        assert!(matches!(err, ExecFailure::InvalidArgument(_)));
    }

    #[test]
    fn test_malformed_node_names() {
        for bad in ["", "pve1; rm -rf /", "pve 1", "../etc"] {
            let err = Target::parse(TargetKind::Host, bad, None).unwrap_err();
            assert!(matches!(err, ExecFailure::InvalidArgument(_)), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_vmid_trims_whitespace() {
        assert_eq!(" 200 ".parse::<Vmid>().unwrap().get(), 200);
    }
}
