use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};

use crate::error::Error;
use crate::llm::types::ToolDefinition;
use crate::tool::{Tool, ToolOutput};

pub(crate) const PROTOCOL_VERSION: &str = "2025-03-26";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// --- JSON-RPC types (shared with the server) ---

/// A request or notification. Notifications carry no `id`.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    fn new(method: &str, params: Option<Value>, id: Option<u64>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.to_string(),
            params,
            id: id.map(Value::from),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

// --- MCP types ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct McpToolDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

impl From<&ToolDefinition> for McpToolDef {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            name: def.name.clone(),
            description: Some(def.description.clone()),
            input_schema: Some(def.input_schema.clone()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct McpToolsListResult {
    pub tools: Vec<McpToolDef>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct McpContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct McpCallToolResult {
    pub content: Vec<McpContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl From<ToolOutput> for McpCallToolResult {
    fn from(output: ToolOutput) -> Self {
        Self {
            content: vec![McpContent {
                content_type: "text".into(),
                text: Some(output.content),
            }],
            is_error: output.is_error,
        }
    }
}

fn mcp_result_to_tool_output(result: McpCallToolResult) -> ToolOutput {
    let text: String = result
        .content
        .iter()
        .filter_map(|c| {
            if c.content_type == "text" {
                c.text.as_deref()
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    if result.is_error {
        ToolOutput::error(text)
    } else {
        ToolOutput::success(text)
    }
}

fn mcp_tool_to_definition(tool: &McpToolDef) -> ToolDefinition {
    ToolDefinition {
        name: tool.name.clone(),
        description: tool.description.clone().unwrap_or_default(),
        input_schema: tool
            .input_schema
            .clone()
            .unwrap_or_else(|| json!({"type": "object"})),
    }
}

// --- McpSession ---

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// One newline-delimited JSON-RPC connection. A background task reads
/// responses and routes them to waiting requests by id.
struct McpSession {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    /// Held so the server process lives as long as the session.
    _child: Mutex<Option<Child>>,
}

impl McpSession {
    fn start<R>(
        reader: R,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
        child: Option<Child>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = Arc::clone(&pending);
        tokio::spawn(async move {
            if let Err(e) = read_loop(reader, Arc::clone(&pending_clone)).await {
                tracing::debug!(error = %e, "MCP reader exited");
            }
            // Dropping the senders wakes every waiter with a closed channel.
            pending_clone.lock().await.clear();
        });

        Self {
            writer: Mutex::new(writer),
            pending,
            next_id: AtomicU64::new(0),
            _child: Mutex::new(child),
        }
    }

    async fn send(&self, message: &JsonRpcRequest) -> Result<(), Error> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn rpc(&self, method: &str, params: Option<Value>) -> Result<Value, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.send(&JsonRpcRequest::new(method, params, Some(id))).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(Error::Mcp(format!(
                    "connection closed while waiting for '{method}'"
                )));
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(Error::Mcp(format!(
                    "'{method}' timed out after {}s",
                    REQUEST_TIMEOUT.as_secs()
                )));
            }
        };

        if let Some(err) = response.error {
            return Err(Error::Mcp(format!(
                "JSON-RPC error {}: {}",
                err.code, err.message
            )));
        }

        response
            .result
            .ok_or_else(|| Error::Mcp("Response missing both result and error".into()))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), Error> {
        self.send(&JsonRpcRequest::new(method, params, None)).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, Error> {
        // Servers expect an object, never null.
        let arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        let params = json!({
            "name": name,
            "arguments": arguments,
        });

        let result_value = self.rpc("tools/call", Some(params)).await?;
        let result: McpCallToolResult = serde_json::from_value(result_value)?;
        Ok(mcp_result_to_tool_output(result))
    }
}

async fn read_loop<R>(reader: R, pending: PendingMap) -> Result<(), Error>
where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response: JsonRpcResponse = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                // Server-initiated requests and notifications land here.
                tracing::debug!(error = %e, "ignoring non-response MCP message");
                continue;
            }
        };
        if response.result.is_none() && response.error.is_none() {
            tracing::debug!(line, "ignoring server-initiated MCP message");
            continue;
        }
        let Some(id) = response.id.as_u64() else {
            tracing::debug!(id = %response.id, "MCP response with unexpected id");
            continue;
        };
        if let Some(tx) = pending.lock().await.remove(&id) {
            let _ = tx.send(response);
        }
    }
    Ok(())
}

// --- McpTool ---

struct McpTool {
    session: Arc<McpSession>,
    def: ToolDefinition,
}

impl Tool for McpTool {
    fn definition(&self) -> ToolDefinition {
        self.def.clone()
    }

    fn execute(
        &self,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, Error>> + Send + '_>> {
        Box::pin(async move {
            match self.session.call_tool(&self.def.name, input).await {
                Ok(output) => Ok(output),
                Err(e) => {
                    tracing::warn!(
                        tool = %self.def.name,
                        error = %e,
                        "MCP tool call failed"
                    );
                    Ok(ToolOutput::error(e.to_string()))
                }
            }
        })
    }
}

// --- McpClient ---

/// Client for a Model Context Protocol server reached over stdio.
///
/// Performs the handshake, discovers tools, and produces
/// `Vec<Arc<dyn Tool>>` for `AgentRunnerBuilder::tools()`.
pub struct McpClient {
    session: Arc<McpSession>,
    tools: Vec<McpToolDef>,
}

impl McpClient {
    /// Spawn `command` and connect to it over its stdin/stdout.
    ///
    /// The child is killed when the client and every tool it produced
    /// are dropped.
    pub async fn connect_stdio(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, Error> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Mcp(format!("failed to spawn {command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Mcp("failed to capture server stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Mcp("failed to capture server stdout".into()))?;

        tracing::debug!(command, ?args, "spawned MCP server");
        let session = McpSession::start(stdout, Box::new(stdin), Some(child));
        Self::handshake(session).await
    }

    /// Connect over an already-open byte stream pair.
    pub async fn connect_streams<R, W>(reader: R, writer: W) -> Result<Self, Error>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let session = McpSession::start(reader, Box::new(writer), None);
        Self::handshake(session).await
    }

    /// initialize → notifications/initialized → tools/list.
    async fn handshake(session: McpSession) -> Result<Self, Error> {
        session
            .rpc(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "gigscout",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                })),
            )
            .await?;

        session.notify("notifications/initialized", None).await?;

        let tools_result = session.rpc("tools/list", None).await?;
        let tools_list: McpToolsListResult = serde_json::from_value(tools_result)?;
        tracing::debug!(tools = tools_list.tools.len(), "MCP tools discovered");

        Ok(Self {
            session: Arc::new(session),
            tools: tools_list.tools,
        })
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(mcp_tool_to_definition).collect()
    }

    /// Convert discovered MCP tools into `Arc<dyn Tool>` instances.
    pub fn into_tools(self) -> Vec<Arc<dyn Tool>> {
        let session = self.session;
        self.tools
            .into_iter()
            .map(|t| {
                let tool: Arc<dyn Tool> = Arc::new(McpTool {
                    session: Arc::clone(&session),
                    def: mcp_tool_to_definition(&t),
                });
                tool
            })
            .collect()
    }
}
