//! MCP server over newline-delimited JSON-RPC

use std::io;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use pvemcp_api::{
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ServerInfo, ToolCallParams,
};

use crate::tools::{self, Tools};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Answers MCP requests; every request runs on its own task
pub struct McpServer {
    tools: Tools,
}

impl McpServer {
    pub fn new(tools: Tools) -> Self {
        Self { tools }
    }

    /// Serve requests from `input` until EOF, writing responses to `output`
    ///
    /// In-flight requests are allowed to finish after EOF.
    ///
    /// # Errors
    /// Returns error if reading the input or writing the output fails
    pub async fn serve<R, W>(self: Arc<Self>, input: R, output: W) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<String>(64);
        let writer = tokio::spawn(async move {
            let mut output = output;
            while let Some(line) = rx.recv().await {
                output.write_all(line.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
            Ok::<_, io::Error>(())
        });

        let mut lines = BufReader::new(input).lines();
        let mut tasks = JoinSet::new();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            debug!(len = line.len(), "request received");

            let server = Arc::clone(&self);
            let tx = tx.clone();
            tasks.spawn(async move {
                let Some(response) = server.handle_line(&line).await else {
                    return;
                };
                match serde_json::to_string(&response) {
                    Ok(text) => {
                        if tx.send(text).await.is_err() {
                            warn!("output closed, dropping response");
                        }
                    }
                    Err(e) => error!(error = %e, "cannot serialize response"),
                }
            });
            while tasks.try_join_next().is_some() {}
        }

        info!(pending = tasks.len(), "input closed");
        while tasks.join_next().await.is_some() {}
        drop(tx);
        writer.await.map_err(io::Error::other)?
    }

    /// Handle one input line; `None` for notifications
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "unparseable request");
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    JsonRpcError::parse_error(format!("Parse error: {e}")),
                ));
            }
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::failure(
                    id,
                    JsonRpcError::invalid_request(format!("Invalid request: {e}")),
                ));
            }
        };
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::failure(
                id,
                JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
            ));
        }

        let notification = request.is_notification();
        let result = self.dispatch(&request.method, request.params).await;
        if notification {
            if let Err(e) = result {
                debug!(method = %request.method, error = %e, "notification failed");
            }
            return None;
        }

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::failure(id, e),
        })
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        match method {
            "initialize" => {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: json!({"tools": {}}),
                    server_info: ServerInfo {
                        name: env!("CARGO_PKG_NAME").to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                };
                to_value(&result)
            }
            "notifications/initialized" | "notifications/cancelled" => Ok(Value::Null),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({"tools": tools::definitions()})),
            "tools/call" => {
                let params: ToolCallParams =
                    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
                        JsonRpcError::invalid_params(format!("invalid tools/call params: {e}"))
                    })?;
                let result = self.tools.call(&params.name, params.arguments).await?;
                to_value(&result)
            }
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::stub_tools;
    use tokio::io::duplex;

    fn server() -> McpServer {
        McpServer::new(stub_tools())
    }

    #[tokio::test]
    async fn test_initialize() {
        let resp = server()
            .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "pvemcp");
        assert_eq!(result["capabilities"], json!({"tools": {}}));
    }

    #[tokio::test]
    async fn test_notification_gets_no_response() {
        let resp = server()
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let server = server();

        let resp = server.handle_line("{not json").await.unwrap();
        assert_eq!(resp.id, Value::Null);
        assert_eq!(resp.error.unwrap().code, JsonRpcError::PARSE_ERROR);

        let resp = server
            .handle_line(r#"{"jsonrpc":"1.0","id":2,"method":"ping"}"#)
            .await
            .unwrap();
        assert_eq!(resp.id, json!(2));
        assert_eq!(resp.error.unwrap().code, JsonRpcError::INVALID_REQUEST);

        let resp = server
            .handle_line(r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tools_call_returns_tool_result() {
        let resp = server()
            .handle_line(
                r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"execute_vm_command","arguments":{"node":"pve1","vmid":"100","command":"echo hi"}}}"#,
            )
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], false);
        assert_eq!(result["content"][0]["type"], "text");
    }

    #[tokio::test]
    async fn test_serve_over_stream() {
        let (mut client, server_side) = duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(server_side);
        let handle = tokio::spawn(Arc::new(server()).serve(read_half, write_half));

        client
            .write_all(
                b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n\
                  \n\
                  {\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}\n",
            )
            .await
            .unwrap();

        let mut reader = BufReader::new(&mut client);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let resp: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["tools"].as_array().unwrap().len(), 6);

        drop(reader);
        client.shutdown().await.unwrap();
        drop(client);
        handle.await.unwrap().unwrap();
    }
}
