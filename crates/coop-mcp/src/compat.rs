//! Compatibility adapter for servers that reject optional discovery calls.
//!
//! Some remote tool servers answer `resources/list` or `prompts/list` with an
//! HTTP 400 or a JSON-RPC error even though tool discovery works. The
//! [`DiscoveryShim`] wraps any transport and, for those two methods only,
//! turns a rejection into an empty listing so initialization can proceed.

use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::protocol::{methods, ListPromptsResult, ListResourcesResult};
use crate::transport::{Transport, TransportKind};
use async_trait::async_trait;
use coop_core::{CoopError, CoopResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How optional discovery calls are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryPolicy {
    /// Send the call; substitute an empty listing if the server rejects it.
    #[default]
    Tolerate,
    /// Never send the call; answer locally with an empty listing.
    Skip,
}

/// Transport decorator applying a [`DiscoveryPolicy`].
pub struct DiscoveryShim {
    inner: Arc<dyn Transport>,
    policy: DiscoveryPolicy,
}

impl DiscoveryShim {
    /// Wrap `inner`.
    pub fn wrap(inner: Arc<dyn Transport>, policy: DiscoveryPolicy) -> Arc<dyn Transport> {
        Arc::new(Self { inner, policy })
    }

    fn empty_listing(method: &str) -> Option<Value> {
        let value = match method {
            methods::RESOURCES_LIST => serde_json::to_value(ListResourcesResult::default()),
            methods::PROMPTS_LIST => serde_json::to_value(ListPromptsResult::default()),
            _ => return None,
        };
        value.ok()
    }
}

#[async_trait]
impl Transport for DiscoveryShim {
    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    fn call_timeout(&self) -> Duration {
        self.inner.call_timeout()
    }

    async fn request(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> CoopResult<JsonRpcResponse> {
        let Some(empty) = Self::empty_listing(&request.method) else {
            return self.inner.request(request, timeout).await;
        };

        if self.policy == DiscoveryPolicy::Skip {
            debug!(method = %request.method, "Skipping optional discovery call");
            return Ok(JsonRpcResponse::success(request.id, empty));
        }

        let id = request.id.clone();
        let method = request.method.clone();
        match self.inner.request(request, timeout).await {
            Ok(resp) if resp.error.is_some() => {
                let reason = resp.error.map(|e| e.message).unwrap_or_default();
                warn!(method = %method, reason = %reason, "Server rejected optional discovery call, continuing without it");
                Ok(JsonRpcResponse::success(id, empty))
            }
            Err(CoopError::PeerReported { code, message }) => {
                warn!(method = %method, code, reason = %message, "Server rejected optional discovery call, continuing without it");
                Ok(JsonRpcResponse::success(id, empty))
            }
            other => other,
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> CoopResult<()> {
        self.inner.notify(notification).await
    }

    async fn close(&self) -> CoopResult<()> {
        self.inner.close().await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::jsonrpc::JsonRpcError;
    use parking_lot::Mutex;

    /// Rejects discovery with HTTP-style 400s and records what was sent.
    struct Rejecting {
        sent: Mutex<Vec<String>>,
        as_json_rpc_error: bool,
    }

    #[async_trait]
    impl Transport for Rejecting {
        fn kind(&self) -> TransportKind {
            TransportKind::StreamableHttp
        }
        fn call_timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
        async fn request(
            &self,
            request: JsonRpcRequest,
            _timeout: Duration,
        ) -> CoopResult<JsonRpcResponse> {
            self.sent.lock().push(request.method.clone());
            if request.method == methods::TOOLS_LIST {
                return Ok(JsonRpcResponse::success(request.id, serde_json::json!({"tools": []})));
            }
            if self.as_json_rpc_error {
                Ok(JsonRpcResponse::failure(
                    Some(request.id),
                    JsonRpcError::new(-32601, "Method not found"),
                ))
            } else {
                Err(CoopError::PeerReported {
                    code: 400,
                    message: "400 Bad Request".into(),
                })
            }
        }
        async fn notify(&self, _n: JsonRpcNotification) -> CoopResult<()> {
            Ok(())
        }
        async fn close(&self) -> CoopResult<()> {
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    fn rejecting(as_json_rpc_error: bool) -> Arc<Rejecting> {
        Arc::new(Rejecting {
            sent: Mutex::new(Vec::new()),
            as_json_rpc_error,
        })
    }

    #[tokio::test]
    async fn test_tolerate_substitutes_empty_listing_on_http_rejection() {
        let inner = rejecting(false);
        let shim = DiscoveryShim::wrap(inner.clone(), DiscoveryPolicy::Tolerate);
        let resp = shim
            .request(JsonRpcRequest::new(1, methods::RESOURCES_LIST, None), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resp.into_result().unwrap()["resources"], serde_json::json!([]));
        assert_eq!(inner.sent.lock().as_slice(), [methods::RESOURCES_LIST]);
    }

    #[tokio::test]
    async fn test_tolerate_substitutes_on_json_rpc_error() {
        let shim = DiscoveryShim::wrap(rejecting(true), DiscoveryPolicy::Tolerate);
        let resp = shim
            .request(JsonRpcRequest::new(2, methods::PROMPTS_LIST, None), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resp.into_result().unwrap()["prompts"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_skip_never_sends() {
        let inner = rejecting(false);
        let shim = DiscoveryShim::wrap(inner.clone(), DiscoveryPolicy::Skip);
        shim.request(JsonRpcRequest::new(1, methods::PROMPTS_LIST, None), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(inner.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_other_methods_pass_through_untouched() {
        let inner = rejecting(true);
        let shim = DiscoveryShim::wrap(inner.clone(), DiscoveryPolicy::Skip);
        let resp = shim
            .request(JsonRpcRequest::new(5, methods::TOOLS_CALL, None), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(resp.error.is_some());
        assert_eq!(inner.sent.lock().as_slice(), [methods::TOOLS_CALL]);
    }
}
