//! Minimal MCP server: newline-delimited JSON-RPC over any byte stream,
//! exposing a fixed set of [`Tool`]s.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::tool::mcp::{
    JsonRpcRequest, JsonRpcResponse, McpCallToolResult, McpToolDef, McpToolsListResult,
    PROTOCOL_VERSION,
};
use crate::tool::{Tool, ToolOutput, validate_tool_input};

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

pub struct McpServer {
    name: String,
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl McpServer {
    pub fn new(name: impl Into<String>, tools: Vec<Arc<dyn Tool>>) -> Self {
        let by_name = tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.definition().name, i))
            .collect();
        Self {
            name: name.into(),
            tools,
            by_name,
        }
    }

    /// Serve on the process's stdin/stdout until stdin closes.
    pub async fn serve_stdio(&self) -> Result<(), Error> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Answer requests one line at a time until `reader` reaches EOF.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(server = %self.name, tools = self.tools.len(), "MCP server started");
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(line).await {
                let mut out = serde_json::to_string(&response)?;
                out.push('\n');
                writer.write_all(out.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        info!(server = %self.name, "MCP client disconnected");
        Ok(())
    }

    /// Response for one incoming line, or `None` for notifications.
    async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparseable MCP message");
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
            }
        };
        let id_hint = value.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                return Some(JsonRpcResponse::failure(
                    id_hint,
                    INVALID_REQUEST,
                    format!("Invalid request: {e}"),
                ));
            }
        };

        let Some(id) = request.id else {
            debug!(method = %request.method, "MCP notification");
            return None;
        };

        let response = match self.dispatch(&request.method, request.params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::failure(id, code, message),
        };
        Some(response)
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, (i64, String)> {
        debug!(method, "MCP request");
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {
                    "name": self.name,
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => {
                let result = McpToolsListResult {
                    tools: self
                        .tools
                        .iter()
                        .map(|t| McpToolDef::from(&t.definition()))
                        .collect(),
                };
                to_value(result)
            }
            "tools/call" => {
                let params = params.ok_or((INVALID_PARAMS, "Missing params".to_string()))?;
                let name = params
                    .get("name")
                    .and_then(|n| n.as_str())
                    .ok_or((INVALID_PARAMS, "Missing tool name".to_string()))?;
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                let output = self.call_tool(name, arguments).await;
                to_value(McpCallToolResult::from(output))
            }
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        }
    }

    /// Run a tool. Failures come back as error results, never as
    /// protocol errors, so the calling model can see them.
    async fn call_tool(&self, name: &str, arguments: Value) -> ToolOutput {
        let Some(&idx) = self.by_name.get(name) else {
            return ToolOutput::error(format!("Unknown tool: {name}"));
        };
        let tool = &self.tools[idx];

        if let Err(message) = validate_tool_input(&tool.definition().input_schema, &arguments) {
            return ToolOutput::error(message);
        }

        match tool.execute(arguments).await {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = name, error = %e, "tool execution failed");
                ToolOutput::error(format!("Error executing tool {name}: {e}"))
            }
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, (i64, String)> {
    serde_json::to_value(value).map_err(|e| (INTERNAL_ERROR, format!("Internal error: {e}")))
}
