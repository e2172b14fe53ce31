//! Text rendering of tool results

use pvemcp_core::{ExecutionOutcome, GuestEntry, GuestKind, NodeEntry, TargetKind};

/// A guest together with the node it lives on
#[derive(Debug, Clone)]
pub struct NodeGuest {
    pub node: String,
    pub guest: GuestEntry,
}

/// A node whose listing could not be read
#[derive(Debug, Clone)]
pub struct NodeFailure {
    pub node: String,
    pub reason: String,
}

#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

#[must_use]
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn memory_line(used: Option<u64>, total: Option<u64>) -> String {
    match (used, total) {
        (Some(used), Some(total)) if total > 0 => {
            #[allow(clippy::cast_precision_loss)]
            let percent = used as f64 / total as f64 * 100.0;
            format!(
                "{} / {} ({percent:.1}%)",
                format_bytes(used),
                format_bytes(total)
            )
        }
        (_, Some(total)) => format!("- / {}", format_bytes(total)),
        _ => "N/A".to_string(),
    }
}

/// Report for one command execution
#[must_use]
pub fn command_report(
    kind: TargetKind,
    node: &str,
    vmid: Option<&str>,
    command: &str,
    outcome: &ExecutionOutcome,
) -> String {
    let mut lines = Vec::new();
    match (kind, vmid) {
        (TargetKind::Vm, Some(vmid)) => {
            lines.push("VM Command Execution".to_string());
            lines.push(format!("  • VM: {vmid} (Node: {node})"));
        }
        (TargetKind::Container, Some(vmid)) => {
            lines.push("Container Command Execution".to_string());
            lines.push(format!("  • Container: {vmid} (Node: {node})"));
        }
        _ => {
            lines.push("Proxmox Host Command Execution".to_string());
            lines.push(format!("  • Node: {node}"));
        }
    }
    lines.push(format!("  • Command: {command}"));

    let status = if outcome.exited_cleanly() {
        "SUCCESS"
    } else {
        "FAILED"
    };
    lines.push(format!("  • Status: {status}"));
    if let Some(code) = outcome.exit_code {
        lines.push(format!("  • Exit Code: {code}"));
    }

    let stdout = outcome.stdout.trim_end();
    if !stdout.is_empty() {
        lines.push(String::new());
        lines.push("Output:".to_string());
        lines.push(stdout.to_string());
    }

    let stderr = outcome.stderr.trim_end();
    let error = outcome.error_message.as_deref().unwrap_or_default();
    for block in [stderr, error] {
        if !block.is_empty() {
            lines.push(String::new());
            lines.push("Error:".to_string());
            lines.push(block.to_string());
        }
    }

    lines.join("\n")
}

#[must_use]
pub fn node_list(nodes: &[NodeEntry]) -> String {
    if nodes.is_empty() {
        return "No nodes found".to_string();
    }
    let mut lines = vec!["Proxmox Nodes".to_string()];
    for node in nodes {
        let status = node.status.as_deref().unwrap_or("unknown").to_uppercase();
        lines.push(String::new());
        lines.push(node.node.clone());
        lines.push(format!("  • Status: {status}"));
        lines.push(format!(
            "  • Uptime: {}",
            node.uptime.map_or_else(|| "N/A".to_string(), format_uptime)
        ));
        if let Some(cpu) = node.cpu {
            lines.push(format!("  • CPU Usage: {:.1}%", cpu * 100.0));
        }
        lines.push(format!("  • Memory: {}", memory_line(node.mem, node.maxmem)));
    }
    lines.join("\n")
}

#[must_use]
pub fn guest_list(kind: GuestKind, guests: &[NodeGuest], failures: &[NodeFailure]) -> String {
    let (title, empty) = match kind {
        GuestKind::Qemu => ("Virtual Machines", "No virtual machines found"),
        GuestKind::Lxc => ("LXC Containers", "No containers found"),
    };

    let mut lines = if guests.is_empty() {
        vec![empty.to_string()]
    } else {
        vec![title.to_string()]
    };
    for NodeGuest { node, guest } in guests {
        let name = guest.name.as_deref().unwrap_or("unnamed");
        lines.push(String::new());
        lines.push(format!("{name} (ID: {})", guest.vmid));
        lines.push(format!("  • Status: {}", guest.status.to_uppercase()));
        lines.push(format!("  • Node: {node}"));
        lines.push(format!(
            "  • CPU Cores: {}",
            guest.cpus.map_or_else(|| "N/A".to_string(), |c| c.to_string())
        ));
        lines.push(format!("  • Memory: {}", memory_line(guest.mem, guest.maxmem)));
    }

    if !failures.is_empty() {
        lines.push(String::new());
        for failure in failures {
            lines.push(format!("Node {} unavailable: {}", failure.node, failure.reason));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvemcp_core::ExecFailure;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(8 * 1024 * 1024 * 1024), "8.00 GiB");
        assert_eq!(format_bytes(1536), "1.50 KiB");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(59), "0m");
        assert_eq!(format_uptime(3_660), "1h 1m");
        assert_eq!(format_uptime(2 * 86_400 + 5 * 3_600 + 120), "2d 5h 2m");
    }

    #[test]
    fn test_command_report_success() {
        let outcome = ExecutionOutcome::completed(Some(0), "hi\n", "");
        let text = command_report(TargetKind::Vm, "n1", Some("100"), "echo hi", &outcome);
        assert_eq!(
            text,
            "VM Command Execution\n  • VM: 100 (Node: n1)\n  • Command: echo hi\n  • Status: SUCCESS\n  • Exit Code: 0\n\nOutput:\nhi"
        );
    }

    #[test]
    fn test_command_report_failure() {
        let outcome: ExecutionOutcome = ExecFailure::NotFound("VM 999 on node n1".into()).into();
        let text = command_report(TargetKind::Vm, "n1", Some("999"), "uptime", &outcome);
        assert!(text.contains("Status: FAILED"));
        assert!(!text.contains("Exit Code"));
        assert!(text.ends_with("Error:\nVM 999 on node n1 not found"));
    }

    #[test]
    fn test_guest_list() {
        let mut guest = GuestEntry::new(200, "running");
        guest.name = Some("nginx".into());
        guest.mem = Some(256 * 1024 * 1024);
        guest.maxmem = Some(512 * 1024 * 1024);
        let guests = vec![NodeGuest {
            node: "pve1".into(),
            guest,
        }];
        let failures = vec![NodeFailure {
            node: "pve2".into(),
            reason: "timed out".into(),
        }];

        let text = guest_list(GuestKind::Lxc, &guests, &failures);
        assert!(text.starts_with("LXC Containers"));
        assert!(text.contains("nginx (ID: 200)"));
        assert!(text.contains("Memory: 256.00 MiB / 512.00 MiB (50.0%)"));
        assert!(text.ends_with("Node pve2 unavailable: timed out"));

        assert_eq!(guest_list(GuestKind::Qemu, &[], &[]), "No virtual machines found");
    }
}
