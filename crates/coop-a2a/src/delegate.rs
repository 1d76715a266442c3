//! Context/goal delegation with a share link on the reply.

use crate::client::PeerAgent;
use crate::message::{compose_prompt, Message};
use crate::share::ShareLink;
use coop_core::CoopError;
use std::sync::Arc;
use tracing::{info, warn};

/// Text returned when the peer produced no reply text.
pub const NO_RESPONSE: &str = "No response from peer agent.";

/// Delegates to one peer and always answers with text.
pub struct Delegator {
    peer: Arc<dyn PeerAgent>,
    share: ShareLink,
}

impl Delegator {
    /// Delegate to `peer` with the default share link.
    pub fn new(peer: Arc<dyn PeerAgent>) -> Self {
        Self {
            peer,
            share: ShareLink::default(),
        }
    }

    /// Use a different share link.
    pub fn with_share_link(mut self, share: ShareLink) -> Self {
        self.share = share;
        self
    }

    /// Ask the peer to work on `goal` given `context`.
    ///
    /// Failures come back as text of the form `Error (<class>)...`.
    pub async fn consult(&self, context: &str, goal: &str) -> String {
        if context.trim().is_empty() || goal.trim().is_empty() {
            return "Error (InvalidInput): both context and goal are required".to_string();
        }

        let message = Message::user(compose_prompt(context, goal));
        info!(peer = %self.peer.location(), "Consulting peer agent");
        match self.peer.send(message).await {
            Ok(Some(text)) => self.share.annotate(&text),
            Ok(None) => NO_RESPONSE.to_string(),
            Err(e) => {
                warn!(peer = %self.peer.location(), error = %e, "Delegation failed");
                self.describe_failure(&e)
            }
        }
    }

    fn describe_failure(&self, error: &CoopError) -> String {
        match error {
            CoopError::PeerReported { code, message } => format!(
                "Error ({}) from peer agent: {message} (code {code})",
                error.class()
            ),
            CoopError::Protocol(message) => format!("Error ({}): {message}", error.class()),
            CoopError::TransportUnavailable(_) => format!(
                "{}. Is the peer agent running at {}?",
                error.to_agent_text(),
                self.peer.location()
            ),
            other => other.to_agent_text(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coop_core::CoopResult;
    use parking_lot::Mutex;

    struct Canned {
        reply: fn() -> CoopResult<Option<String>>,
        seen: Mutex<Vec<Message>>,
    }

    impl Canned {
        fn new(reply: fn() -> CoopResult<Option<String>>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PeerAgent for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn send(&self, message: Message) -> CoopResult<Option<String>> {
            self.seen.lock().push(message);
            (self.reply)()
        }
    }

    #[tokio::test]
    async fn test_reply_gets_share_link() {
        let peer = Canned::new(|| Ok(Some("Buy now!".into())));
        let out = Delegator::new(peer.clone())
            .consult("50 units expiring", "write a tweet")
            .await;
        assert!(out.starts_with("Buy now!\n\n[Post to Twitter]("));
        assert!(out.contains("text=Buy%20now%21"));

        let seen = peer.seen.lock();
        assert_eq!(
            seen[0].first_text(),
            Some("Context: 50 units expiring\nGoal: write a tweet")
        );
    }

    #[tokio::test]
    async fn test_empty_reply_has_no_link() {
        let out = Delegator::new(Canned::new(|| Ok(None))).consult("c", "g").await;
        assert_eq!(out, NO_RESPONSE);
    }

    #[tokio::test]
    async fn test_empty_input_never_reaches_peer() {
        let peer = Canned::new(|| Ok(Some("x".into())));
        let out = Delegator::new(peer.clone()).consult("", "g").await;
        assert_eq!(out, "Error (InvalidInput): both context and goal are required");
        assert!(peer.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failures_become_text() {
        let out = Delegator::new(Canned::new(|| {
            Err(CoopError::PeerReported {
                code: -1,
                message: "boom".into(),
            })
        }))
        .consult("c", "g")
        .await;
        assert_eq!(out, "Error (PeerReportedError) from peer agent: boom (code -1)");

        let out = Delegator::new(Canned::new(|| {
            Err(CoopError::Protocol("unexpected response format from peer agent: {}".into()))
        }))
        .consult("c", "g")
        .await;
        assert_eq!(
            out,
            "Error (ProtocolError): unexpected response format from peer agent: {}"
        );

        let out = Delegator::new(Canned::new(|| {
            Err(CoopError::TransportUnavailable("connection refused".into()))
        }))
        .consult("c", "g")
        .await;
        assert!(out.starts_with("Error (TransportUnavailable)"));
        assert!(out.contains("canned"));
    }
}
