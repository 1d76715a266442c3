//! In-process peer agents.
//!
//! An [`AgentEngine`] runs one message in a session and streams
//! [`AgentEvent`]s back. [`EmbeddedPeer`] gives each delegation a fresh
//! session and drains the whole stream before picking the reply.

use crate::client::PeerAgent;
use crate::message::Message;
use async_trait::async_trait;
use coop_core::{CoopError, CoopResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// User id attached to delegated sessions.
pub const DELEGATION_USER: &str = "system_delegation";

/// One conversation with an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// `<app>-<8 hex>`.
    pub session_id: String,
    /// Application the session belongs to.
    pub app_name: String,
    /// Requesting user.
    pub user_id: String,
}

impl Session {
    /// A new delegation session for `app_name`.
    pub fn fresh(app_name: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            session_id: format!("{app_name}-{}", &suffix[..8]),
            app_name: app_name.to_string(),
            user_id: DELEGATION_USER.to_string(),
        }
    }
}

/// One event emitted while an engine runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Who produced the event.
    pub author: String,
    /// Text content, if any.
    pub text: Option<String>,
    /// Whether this is a final response.
    pub is_final: bool,
}

impl AgentEvent {
    /// Intermediate event (tool call, partial output).
    pub fn progress(author: impl Into<String>, text: Option<String>) -> Self {
        Self {
            author: author.into(),
            text,
            is_final: false,
        }
    }

    /// Final response carrying `text`.
    pub fn final_text(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: Some(text.into()),
            is_final: true,
        }
    }
}

/// An agent runtime that can be driven in-process.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Application name, used as the session prefix.
    fn app_name(&self) -> &str;

    /// Start running `message` in `session`. Events arrive on the returned
    /// channel, which closes when the run ends.
    async fn run(&self, session: &Session, message: Message) -> CoopResult<mpsc::Receiver<AgentEvent>>;
}

/// A peer backed by an in-process engine.
pub struct EmbeddedPeer {
    engine: Arc<dyn AgentEngine>,
    timeout: Duration,
}

impl EmbeddedPeer {
    /// Wrap `engine`; a whole run must finish within `timeout`.
    pub fn new(engine: Arc<dyn AgentEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    async fn run_to_end(&self, message: Message) -> CoopResult<Vec<AgentEvent>> {
        let session = Session::fresh(self.engine.app_name());
        debug!(session = %session.session_id, "Running embedded agent");
        let mut rx = self.engine.run(&session, message).await?;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        Ok(events)
    }
}

#[async_trait]
impl PeerAgent for EmbeddedPeer {
    fn name(&self) -> &str {
        self.engine.app_name()
    }

    async fn send(&self, message: Message) -> CoopResult<Option<String>> {
        let events = tokio::time::timeout(self.timeout, self.run_to_end(message))
            .await
            .map_err(|_| {
                CoopError::timeout(format!("embedded agent {}", self.engine.app_name()), self.timeout)
            })??;

        let reply = events
            .iter()
            .filter(|e| e.is_final)
            .find_map(|e| e.text.as_deref().filter(|t| !t.is_empty()))
            .map(str::to_string);
        if reply.is_none() {
            warn!(events = events.len(), "Embedded agent finished without a final text");
        }
        Ok(reply)
    }
}
