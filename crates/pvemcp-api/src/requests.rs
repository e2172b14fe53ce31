//! Request types for the MCP stdio protocol

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 request or notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    /// Notifications carry no id and get no response
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Params of `tools/call`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Arguments of `execute_vm_command` and `execute_container_command`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestCommandArgs {
    pub node: String,
    #[serde(deserialize_with = "string_or_number")]
    pub vmid: String,
    pub command: String,
}

/// Arguments of `execute_host_command`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCommandArgs {
    pub node: String,
    pub command: String,
}

/// Accept `"100"` and `100` alike
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}
