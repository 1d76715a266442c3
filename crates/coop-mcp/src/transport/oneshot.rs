//! One-shot JSON-RPC over HTTP: one POST per call, nothing kept between calls.

use super::{build_http_client, check_status, map_send_error, truncate, HttpConfig, Transport, TransportKind};
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use coop_core::{CoopError, CoopResult};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Stateless JSON-RPC client for one endpoint.
pub struct OneShotTransport {
    client: reqwest::Client,
    url: String,
    closed: AtomicBool,
    timeout: Duration,
}

impl OneShotTransport {
    /// Build the client with the config's static headers.
    pub fn new(config: &HttpConfig) -> CoopResult<Self> {
        Ok(Self {
            client: build_http_client(config)?,
            url: config.url.clone(),
            closed: AtomicBool::new(false),
            timeout: config.timeout,
        })
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST `body` and return the decoded JSON reply as-is.
    ///
    /// For callers that interpret the payload themselves.
    pub async fn post_value(&self, body: &Value, timeout: Duration) -> CoopResult<Value> {
        let exchange = async {
            let response = self
                .client
                .post(&self.url)
                .json(body)
                .send()
                .await
                .map_err(|e| map_send_error(e, &self.url))?;
            let response = check_status(response).await?;
            let text = response
                .text()
                .await
                .map_err(|e| map_send_error(e, &self.url))?;
            serde_json::from_str::<Value>(&text).map_err(|e| {
                CoopError::Protocol(format!(
                    "response from {} is not JSON ({e}): {}",
                    self.url,
                    truncate(&text, 256)
                ))
            })
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| CoopError::timeout(format!("POST {}", self.url), timeout))?
    }
}

#[async_trait]
impl Transport for OneShotTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::OneShotHttp
    }

    fn call_timeout(&self) -> Duration {
        self.timeout
    }

    async fn request(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> CoopResult<JsonRpcResponse> {
        if self.is_closed() {
            return Err(CoopError::TransportUnavailable(format!(
                "transport to {} is closed",
                self.url
            )));
        }
        let raw = self
            .post_value(&serde_json::to_value(&request)?, timeout)
            .await?;
        let response: JsonRpcResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            CoopError::Protocol(format!("invalid JSON-RPC response ({e}): {raw}"))
        })?;
        response.ensure_id(&request.id)?;
        Ok(response)
    }

    async fn notify(&self, notification: JsonRpcNotification) -> CoopResult<()> {
        let send = async {
            let response = self
                .client
                .post(&self.url)
                .json(&notification)
                .send()
                .await
                .map_err(|e| map_send_error(e, &self.url))?;
            check_status(response).await.map(|_| ())
        };
        tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| CoopError::timeout(format!("POST {}", self.url), self.timeout))?
    }

    async fn close(&self) -> CoopResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(url = %self.url, "One-shot transport closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
