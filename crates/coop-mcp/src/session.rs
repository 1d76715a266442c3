//! Tool session: initialize → discover → invoke → close over one transport.

use crate::compat::{DiscoveryPolicy, DiscoveryShim};
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest};
use crate::protocol::{
    methods, Implementation, InitializeResult, ListPromptsResult, ListResourcesResult,
    ListToolsResult, ToolCallResult, PROTOCOL_VERSION,
};
use crate::transport::{self, Transport, TransportConfig, TransportKind};
use coop_core::{CoopError, CoopResult, ToolDescriptor};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Upper bound on pages followed for one listing.
const MAX_PAGES: usize = 64;

/// One MCP session with one tool-providing endpoint.
///
/// Ids are allocated from a per-session counter, so concurrent calls on the
/// same session are correlated independently.
pub struct ToolSession {
    label: String,
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    timeout: Duration,
    expires_at: Option<Instant>,
    init: RwLock<Option<InitializeResult>>,
    resources: RwLock<Vec<Value>>,
    prompts: RwLock<Vec<Value>>,
}

impl ToolSession {
    /// A session over `transport` that tolerates rejected optional discovery.
    pub fn new(label: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self::with_policy(label, transport, DiscoveryPolicy::default())
    }

    /// A session applying `policy` to optional discovery calls.
    pub fn with_policy(
        label: impl Into<String>,
        transport: Arc<dyn Transport>,
        policy: DiscoveryPolicy,
    ) -> Self {
        let timeout = transport.call_timeout();
        Self {
            label: label.into(),
            transport: DiscoveryShim::wrap(transport, policy),
            next_id: AtomicU64::new(1),
            timeout,
            expires_at: None,
            init: RwLock::new(None),
            resources: RwLock::new(Vec::new()),
            prompts: RwLock::new(Vec::new()),
        }
    }

    /// Open a transport and complete the handshake. The transport is closed
    /// again if the handshake fails.
    pub async fn connect(
        label: impl Into<String>,
        config: &TransportConfig,
        policy: DiscoveryPolicy,
    ) -> CoopResult<Self> {
        let transport = transport::open(config).await?;
        let session = Self::with_policy(label, transport, policy);
        if let Err(e) = session.initialize().await {
            let _ = session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    /// Override the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mark the session stale after `lifetime`, when the credentials it was
    /// opened with run out.
    pub fn expiring_after(mut self, lifetime: Duration) -> Self {
        self.expires_at = Some(Instant::now() + lifetime);
        self
    }

    /// Whether the session outlived its credentials.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    /// Name used in logs and errors.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The binding underneath.
    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Server identity from the handshake.
    pub fn server_info(&self) -> Option<Implementation> {
        self.init.read().as_ref().and_then(|i| i.server_info.clone())
    }

    /// Server usage instructions from the handshake.
    pub fn instructions(&self) -> Option<String> {
        self.init.read().as_ref().and_then(|i| i.instructions.clone())
    }

    /// Resources discovered during initialization.
    pub fn resources(&self) -> Vec<Value> {
        self.resources.read().clone()
    }

    /// Prompts discovered during initialization.
    pub fn prompts(&self) -> Vec<Value> {
        self.prompts.read().clone()
    }

    /// Whether the transport has been closed or has died.
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    async fn request(&self, method: &str, params: Option<Value>) -> CoopResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        debug!(session = %self.label, id, method, "Sending request");
        let response = self.transport.request(request, self.timeout).await?;
        response.into_result()
    }

    async fn request_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> CoopResult<T> {
        let result = self.request(method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| CoopError::Protocol(format!("unexpected '{method}' result: {e}")))
    }

    /// Handshake, then optional discovery of resources and prompts when the
    /// server advertises them.
    pub async fn initialize(&self) -> CoopResult<InitializeResult> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": Implementation::coop_client(),
        });
        let init: InitializeResult = self.request_as(methods::INITIALIZE, Some(params)).await?;
        self.transport
            .notify(JsonRpcNotification::new(methods::INITIALIZED, None))
            .await?;

        info!(
            session = %self.label,
            version = %init.protocol_version,
            server = ?init.server_info.as_ref().map(|s| s.name.as_str()),
            "MCP session initialized"
        );

        if init.capabilities.resources.is_some() {
            let resources = self
                .collect_pages(methods::RESOURCES_LIST, |page: ListResourcesResult| {
                    (page.resources, page.next_cursor)
                })
                .await?;
            *self.resources.write() = resources;
        }
        if init.capabilities.prompts.is_some() {
            let prompts = self
                .collect_pages(methods::PROMPTS_LIST, |page: ListPromptsResult| {
                    (page.prompts, page.next_cursor)
                })
                .await?;
            *self.prompts.write() = prompts;
        }

        *self.init.write() = Some(init.clone());
        Ok(init)
    }

    async fn collect_pages<P, T>(
        &self,
        method: &str,
        split: impl Fn(P) -> (Vec<T>, Option<String>),
    ) -> CoopResult<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: P = self.request_as(method, params).await?;
            let (mut batch, next) = split(page);
            items.append(&mut batch);
            match next {
                Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
                _ => return Ok(items),
            }
        }
        Err(CoopError::Protocol(format!(
            "'{method}' did not finish within {MAX_PAGES} pages"
        )))
    }

    /// All tools the server offers, following pagination.
    pub async fn list_tools(&self) -> CoopResult<Vec<ToolDescriptor>> {
        let tools = self
            .collect_pages(methods::TOOLS_LIST, |page: ListToolsResult| {
                (page.tools, page.next_cursor)
            })
            .await?;
        info!(session = %self.label, tools = tools.len(), "MCP tools discovered");
        Ok(tools)
    }

    /// Invoke `name` with `arguments`.
    ///
    /// Not retried: a lost transport surfaces as `TransportUnavailable` and
    /// the call may or may not have run.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> CoopResult<ToolCallResult> {
        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.request(methods::TOOLS_CALL, Some(params)).await?;
        serde_json::from_value(result).map_err(|e| {
            CoopError::Protocol(format!("malformed result from tool '{name}': {e}"))
        })
    }

    /// Liveness check.
    pub async fn ping(&self) -> CoopResult<()> {
        self.request(methods::PING, None).await.map(|_| ())
    }

    /// Release the transport. Idempotent.
    pub async fn close(&self) -> CoopResult<()> {
        self.transport.close().await
    }
}
