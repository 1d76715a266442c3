//! Peer agents reachable over A2A JSON-RPC.

use crate::message::{message_send, reply_text, Message};
use async_trait::async_trait;
use coop_core::CoopResult;
use coop_mcp::{HttpConfig, OneShotTransport};
use std::time::Duration;
use tracing::debug;

/// Default peer endpoint.
pub const DEFAULT_PEER_URL: &str = "http://localhost:8001/";
/// Default deadline for one delegation round trip.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(60);

/// Something a message can be delegated to.
#[async_trait]
pub trait PeerAgent: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Where the peer lives, for diagnostics.
    fn location(&self) -> String {
        self.name().to_string()
    }

    /// Deliver `message` and wait for the reply text. `Ok(None)` means the
    /// peer answered without any text.
    async fn send(&self, message: Message) -> CoopResult<Option<String>>;
}

/// A peer reached with `message/send` over HTTP.
pub struct RemotePeer {
    transport: OneShotTransport,
    timeout: Duration,
}

impl RemotePeer {
    /// Peer at `url` with the default deadline.
    pub fn new(url: impl Into<String>) -> CoopResult<Self> {
        Self::with_timeout(url, DEFAULT_PEER_TIMEOUT)
    }

    /// Peer at `url` with a custom deadline.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> CoopResult<Self> {
        let config = HttpConfig::new(url).with_timeout(timeout);
        Ok(Self {
            transport: OneShotTransport::new(&config)?,
            timeout,
        })
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        self.transport.url()
    }
}

#[async_trait]
impl PeerAgent for RemotePeer {
    fn name(&self) -> &str {
        "remote"
    }

    fn location(&self) -> String {
        self.url().to_string()
    }

    async fn send(&self, message: Message) -> CoopResult<Option<String>> {
        let request = message_send(message)?;
        debug!(url = %self.url(), id = %request.id, "Delegating message");
        let body = serde_json::to_value(&request)?;
        let response = self.transport.post_value(&body, self.timeout).await?;
        reply_text(&response).map(Some)
    }
}
