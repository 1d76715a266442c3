//! MCP streamable HTTP binding.
//!
//! Every frame is a POST to one endpoint. The server answers either with a
//! plain JSON body or with a short `text/event-stream` whose events carry
//! JSON-RPC messages; the one whose id matches ours is the response.
//! A request abandoned on timeout is followed by `notifications/cancelled`.

use super::{build_http_client, check_status, map_send_error, truncate, HttpConfig, Transport, TransportKind};
use crate::jsonrpc::{Incoming, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::protocol::methods;
use async_trait::async_trait;
use coop_core::{CoopError, CoopResult};
use parking_lot::RwLock;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Session header assigned by the server and echoed on every later request.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Upper bound on delivering a cancellation notice.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(2);

/// A persistent streamable HTTP connection to one MCP endpoint.
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    url: String,
    session_id: RwLock<Option<String>>,
    closed: AtomicBool,
    timeout: Duration,
}

impl StreamableHttpTransport {
    /// Build the client with the config's static headers.
    pub fn new(config: &HttpConfig) -> CoopResult<Self> {
        Ok(Self {
            client: build_http_client(config)?,
            url: config.url.clone(),
            session_id: RwLock::new(None),
            closed: AtomicBool::new(false),
            timeout: config.timeout,
        })
    }

    /// Session id assigned by the server, once known.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn post(&self) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(&self.url)
            .header(ACCEPT, ACCEPT_BOTH);
        match self.session_id() {
            Some(id) => builder.header(SESSION_HEADER, id),
            None => builder,
        }
    }

    fn ensure_open(&self) -> CoopResult<()> {
        if self.is_closed() {
            Err(CoopError::TransportUnavailable(format!(
                "connection to {} is closed",
                self.url
            )))
        } else {
            Ok(())
        }
    }

    /// Best effort: tell the server to stop working on `id`.
    async fn cancel(&self, id: &RequestId, reason: &str) {
        let notification = JsonRpcNotification::new(
            methods::CANCELLED,
            Some(json!({"requestId": id, "reason": reason})),
        );
        let send = self.post().json(&notification).send();
        match tokio::time::timeout(CANCEL_TIMEOUT, send).await {
            Ok(Ok(resp)) => debug!(url = %self.url, request = %id, status = %resp.status(), "Sent cancellation"),
            Ok(Err(e)) => debug!(url = %self.url, request = %id, error = %e, "Cancellation not delivered"),
            Err(_) => debug!(url = %self.url, request = %id, "Cancellation timed out"),
        }
    }

    async fn exchange(&self, request: &JsonRpcRequest) -> CoopResult<JsonRpcResponse> {
        let response = self
            .post()
            .json(request)
            .send()
            .await
            .map_err(|e| map_send_error(e, &self.url))?;
        let response = check_status(response).await?;

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut slot = self.session_id.write();
            if slot.as_deref() != Some(id) {
                debug!(url = %self.url, session = %id, "MCP session established");
                *slot = Some(id.to_string());
            }
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = response
            .text()
            .await
            .map_err(|e| map_send_error(e, &self.url))?;

        if is_event_stream {
            find_in_event_stream(&body, &request.id)
        } else {
            parse_json_body(&body)
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    fn call_timeout(&self) -> Duration {
        self.timeout
    }

    async fn request(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> CoopResult<JsonRpcResponse> {
        self.ensure_open()?;
        // Dropping the exchange future on timeout aborts the HTTP request.
        let Ok(outcome) = tokio::time::timeout(timeout, self.exchange(&request)).await else {
            warn!(url = %self.url, method = %request.method, "MCP request timed out");
            self.cancel(&request.id, &format!("client timed out after {timeout:?}"))
                .await;
            return Err(CoopError::timeout(
                format!("{} on {}", request.method, self.url),
                timeout,
            ));
        };
        let response = outcome?;
        response.ensure_id(&request.id)?;
        Ok(response)
    }

    async fn notify(&self, notification: JsonRpcNotification) -> CoopResult<()> {
        self.ensure_open()?;
        let send = async {
            let response = self
                .post()
                .json(&notification)
                .send()
                .await
                .map_err(|e| map_send_error(e, &self.url))?;
            check_status(response).await.map(|_| ())
        };
        tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| CoopError::timeout(format!("{} on {}", notification.method, self.url), self.timeout))?
    }

    async fn close(&self) -> CoopResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(id) = self.session_id.write().take() else {
            return Ok(());
        };
        // Best effort: servers may not support explicit termination.
        let terminate = self.client.delete(&self.url).header(SESSION_HEADER, id).send();
        match tokio::time::timeout(self.timeout, terminate).await {
            Ok(Ok(resp)) => debug!(url = %self.url, status = %resp.status(), "MCP session terminated"),
            Ok(Err(e)) => debug!(url = %self.url, error = %e, "MCP session termination failed"),
            Err(_) => debug!(url = %self.url, "MCP session termination timed out"),
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn parse_json_body(body: &str) -> CoopResult<JsonRpcResponse> {
    if body.trim().is_empty() {
        return Err(CoopError::Protocol(
            "server accepted the request without a response body".into(),
        ));
    }
    match Incoming::parse(body)? {
        Incoming::Response(resp) => Ok(resp),
        _ => Err(CoopError::Protocol(format!(
            "expected a JSON-RPC response, got: {}",
            truncate(body, 256)
        ))),
    }
}

/// Scan an SSE body for the response to `id`. Other events are skipped.
pub(crate) fn find_in_event_stream(body: &str, id: &RequestId) -> CoopResult<JsonRpcResponse> {
    for data in sse_data(body) {
        match Incoming::parse(&data) {
            Ok(Incoming::Response(resp)) if resp.id.as_ref() == Some(id) => return Ok(resp),
            Ok(Incoming::Response(resp)) => {
                debug!(id = ?resp.id, "Skipping response for another request");
            }
            Ok(Incoming::Request(req)) => {
                debug!(method = %req.method, "Ignoring server request on response stream");
            }
            Ok(Incoming::Notification(n)) => {
                debug!(method = %n.method, "Ignoring server notification on response stream");
            }
            Err(e) => return Err(e),
        }
    }
    Err(CoopError::Protocol(format!(
        "event stream ended without a response to request {id}"
    )))
}

/// Payloads of all events in an SSE body. Multi-line `data:` fields are
/// joined with `\n`.
fn sse_data(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in body.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            if !current.is_empty() {
                events.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            current.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }
    if !current.is_empty() {
        events.push(current.join("\n"));
    }
    events
}
