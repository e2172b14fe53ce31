//! Wire types for Proxmox VE API payloads

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use pvemcp_core::{AgentExecStatus, GuestEntry};

/// Every API response wraps its payload in `data`
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// Body of `POST .../agent/exec`
#[derive(Debug, Serialize)]
pub struct AgentExecRequest<'a> {
    pub command: &'a [String],
}

/// Result of `POST .../agent/exec`
#[derive(Debug, Deserialize)]
pub struct AgentExecStarted {
    pub pid: u64,
}

/// Result of `GET .../agent/exec-status`
#[derive(Debug, Clone, Deserialize)]
pub struct AgentExecStatusRecord {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub exited: bool,
    #[serde(default)]
    pub exitcode: Option<i32>,
    #[serde(default, rename = "out-data")]
    pub out_data: Option<String>,
    #[serde(default, rename = "err-data")]
    pub err_data: Option<String>,
    #[serde(default)]
    pub signal: Option<i32>,
}

impl From<AgentExecStatusRecord> for AgentExecStatus {
    fn from(record: AgentExecStatusRecord) -> Self {
        AgentExecStatus {
            exited: record.exited,
            exitcode: record.exitcode,
            out_data: record.out_data,
            err_data: record.err_data,
            signal: record.signal,
        }
    }
}

/// One entry of `GET /nodes/{node}/qemu` or `/lxc`
#[derive(Debug, Clone, Deserialize)]
pub struct GuestRecord {
    #[serde(deserialize_with = "lenient_u32")]
    pub vmid: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub mem: Option<u64>,
    #[serde(default)]
    pub maxmem: Option<u64>,
    #[serde(default)]
    pub cpus: Option<f64>,
}

impl From<GuestRecord> for GuestEntry {
    fn from(record: GuestRecord) -> Self {
        GuestEntry {
            vmid: record.vmid,
            name: record.name,
            status: record.status,
            mem: record.mem,
            maxmem: record.maxmem,
            cpus: record.cpus,
        }
    }
}

/// One entry of `GET /cluster/status`
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterMember {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: Option<String>,
}

impl ClusterMember {
    #[must_use]
    pub fn is_node(&self) -> bool {
        self.kind == "node"
    }
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Str(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
        Flag::Str(s) => matches!(s.as_str(), "1" | "true"),
    })
}

fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Int(u32),
        Str(String),
    }

    match Id::deserialize(deserializer)? {
        Id::Int(i) => Ok(i),
        Id::Str(s) => s.parse().map_err(de::Error::custom),
    }
}
