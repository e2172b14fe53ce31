//! pvemcp-api: MCP protocol types
//!
//! JSON-RPC envelopes, tool argument structs and tool result content
//! exchanged over the server's stdio transport.

pub mod requests;
pub mod responses;

pub use requests::{GuestCommandArgs, HostCommandArgs, JsonRpcRequest, ToolCallParams};
pub use responses::{
    InitializeResult, JsonRpcError, JsonRpcResponse, ServerInfo, ToolContent, ToolDefinition,
    ToolResult,
};
