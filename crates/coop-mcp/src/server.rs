//! MCP server exposing in-process [`Tool`]s over newline-delimited stdio.
//!
//! Requests are handled concurrently; responses are written as they finish,
//! one JSON object per line. Nothing but frames is ever written to the
//! output stream, so logs must go to stderr.

use crate::jsonrpc::{
    Incoming, JsonRpcError, JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::protocol::{
    methods, Implementation, InitializeResult, ListToolsResult, ServerCapabilities,
    ToolCallResult, PROTOCOL_VERSION,
};
use coop_core::{CoopError, CoopResult, Tool, ToolCall, ToolDescriptor};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A stdio MCP server over a fixed set of tools.
pub struct McpServer {
    info: Implementation,
    instructions: Option<String>,
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl McpServer {
    /// An empty server announcing itself as `name`/`version`.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: Implementation {
                name: name.into(),
                version: version.into(),
            },
            instructions: None,
            tools: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Usage hints returned in the `initialize` result.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Add a tool. Two tools with one name are a configuration error.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> CoopResult<Self> {
        let name = tool.descriptor().name.clone();
        if self.by_name.contains_key(&name) {
            return Err(CoopError::Config(format!(
                "Tool '{name}' is registered twice on server '{}'",
                self.info.name
            )));
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(self)
    }

    /// Descriptors of all served tools, in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor().clone()).collect()
    }

    /// Serve on the process's stdin/stdout until stdin closes.
    pub async fn serve_stdio(self: Arc<Self>) -> CoopResult<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve frames read from `input`, writing responses to `output`.
    pub async fn serve<R, W>(self: Arc<Self>, input: R, output: W) -> CoopResult<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!(server = %self.info.name, tools = self.tools.len(), "MCP server listening on stdio");

        let (tx, rx) = mpsc::channel::<JsonRpcResponse>(64);
        let writer = tokio::spawn(write_frames(output, rx));
        let mut in_flight = JoinSet::new();

        let mut lines = BufReader::new(input).lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match Incoming::parse(trimmed) {
                Ok(Incoming::Request(request)) => {
                    let server = self.clone();
                    let tx = tx.clone();
                    in_flight.spawn(async move {
                        let response = server.handle(request).await;
                        let _ = tx.send(response).await;
                    });
                }
                Ok(Incoming::Notification(n)) => {
                    debug!(method = %n.method, "Notification received");
                }
                Ok(Incoming::Response(r)) => {
                    debug!(id = ?r.id, "Ignoring response frame from client");
                }
                Err(e) => {
                    warn!(error = %e, "Unparseable frame");
                    let code = if serde_json::from_str::<Value>(trimmed).is_ok() {
                        INVALID_REQUEST
                    } else {
                        PARSE_ERROR
                    };
                    let _ = tx
                        .send(JsonRpcResponse::failure(None, JsonRpcError::new(code, e.to_string())))
                        .await;
                }
            }
        }

        debug!("Input closed, draining in-flight requests");
        while in_flight.join_next().await.is_some() {}
        drop(tx);
        writer
            .await
            .map_err(|e| CoopError::Io(std::io::Error::other(e)))??;
        info!(server = %self.info.name, "MCP server stopped");
        Ok(())
    }

    /// Answer one request.
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let outcome = match request.method.as_str() {
            methods::INITIALIZE => Ok(self.initialize_result()),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => serde_json::to_value(ListToolsResult {
                tools: self.descriptors(),
                next_cursor: None,
            })
            .map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string())),
            methods::TOOLS_CALL => self.call(request.params).await,
            other => Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        };
        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(Some(id), error),
        }
    }

    fn initialize_result(&self) -> Value {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(json!({})),
                ..ServerCapabilities::default()
            },
            server_info: Some(self.info.clone()),
            instructions: self.instructions.clone(),
        };
        serde_json::to_value(result).unwrap_or_else(|_| json!({}))
    }

    async fn call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.unwrap_or(Value::Null);
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, "Missing tool name"))?;
        let tool = self
            .by_name
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| JsonRpcError::new(INVALID_PARAMS, format!("Unknown tool: {name}")))?;
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        debug!(tool = %name, "Executing tool");
        // Tool failures go back in the result so the calling model can read them.
        let result = match tool.execute(ToolCall::new(name, arguments)).await {
            Ok(r) if r.is_error => ToolCallResult::error(r.content),
            Ok(r) => ToolCallResult::from_text(r.content),
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool failed");
                ToolCallResult::error(e.to_agent_text())
            }
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))
    }
}

async fn write_frames<W>(mut output: W, mut rx: mpsc::Receiver<JsonRpcResponse>) -> CoopResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_string(&response)?;
        line.push('\n');
        output.write_all(line.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}
