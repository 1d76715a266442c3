//! Remote MCP tools exposed as [`Tool`]s.
//!
//! A [`SessionPool`] owns the sessions of one source. In persistent mode one
//! session is shared and reopened on next use after it dies or its
//! credentials expire; in per-call mode every call opens a fresh session (a
//! fresh process, for stdio) and closes it on every path.

use crate::compat::DiscoveryPolicy;
use crate::protocol::ToolCallResult;
use crate::session::ToolSession;
use crate::transport::TransportConfig;
use async_trait::async_trait;
use coop_core::{CoopError, CoopResult, Tool, ToolCall, ToolDescriptor, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Opens initialized sessions for one source.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Source name, for logs.
    fn source(&self) -> &str;

    /// Open a transport and complete the handshake.
    async fn open(&self) -> CoopResult<ToolSession>;

    /// Whether opening again resolves fresh credentials, so that a request
    /// rejected with 401 is worth one retry on a new session.
    fn reauthenticates(&self) -> bool {
        false
    }
}

/// Opens sessions from a fixed [`TransportConfig`].
pub struct TransportSessionFactory {
    source: String,
    config: TransportConfig,
    policy: DiscoveryPolicy,
}

impl TransportSessionFactory {
    /// A factory for `source` using `config`.
    pub fn new(source: impl Into<String>, config: TransportConfig, policy: DiscoveryPolicy) -> Self {
        Self {
            source: source.into(),
            config,
            policy,
        }
    }
}

#[async_trait]
impl SessionFactory for TransportSessionFactory {
    fn source(&self) -> &str {
        &self.source
    }

    async fn open(&self) -> CoopResult<ToolSession> {
        ToolSession::connect(self.source.clone(), &self.config, self.policy).await
    }
}

/// Session lifetime policy of a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// One shared session, reopened after it dies.
    #[default]
    Persistent,
    /// A fresh session per call, always closed afterwards.
    PerCall,
}

/// Hands out sessions of one source according to its [`SessionMode`].
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    mode: SessionMode,
    shared: Mutex<Option<Arc<ToolSession>>>,
    reopen_count: AtomicUsize,
}

impl SessionPool {
    /// A pool over `factory`.
    pub fn new(factory: Arc<dyn SessionFactory>, mode: SessionMode) -> Self {
        Self {
            factory,
            mode,
            shared: Mutex::new(None),
            reopen_count: AtomicUsize::new(0),
        }
    }

    /// Source name.
    pub fn source(&self) -> &str {
        self.factory.source()
    }

    /// Session mode.
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// How many times the shared session was replaced: died, expired or
    /// had its credentials rejected.
    pub fn reopen_count(&self) -> usize {
        self.reopen_count.load(Ordering::Relaxed)
    }

    async fn shared_session(&self) -> CoopResult<Arc<ToolSession>> {
        let mut slot = self.shared.lock().await;
        if let Some(session) = slot.take() {
            if session.is_closed() {
                warn!(source = %self.source(), "Session is gone, reopening");
            } else if session.is_expired() {
                info!(source = %self.source(), "Session credentials expired, reopening");
                self.release(&session).await;
            } else {
                *slot = Some(session.clone());
                return Ok(session);
            }
            self.reopen_count.fetch_add(1, Ordering::Relaxed);
        }
        let session = Arc::new(self.factory.open().await?);
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Drop `session` from the slot if it is still the shared one.
    async fn invalidate(&self, session: &Arc<ToolSession>) {
        {
            let mut slot = self.shared.lock().await;
            if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)) {
                *slot = None;
                self.reopen_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.release(session).await;
    }

    fn retry_after(&self, error: &CoopError) -> bool {
        if error.is_unauthorized() && self.factory.reauthenticates() {
            warn!(source = %self.source(), "Credentials rejected, reopening session once");
            true
        } else {
            false
        }
    }

    /// Close a session the pool no longer hands out. Runs on success and
    /// failure alike.
    async fn release(&self, session: &ToolSession) {
        if let Err(e) = session.close().await {
            warn!(source = %self.source(), error = %e, "Failed to close per-call session");
        }
    }

    /// Discover the source's tools.
    pub async fn list_tools(&self) -> CoopResult<Vec<ToolDescriptor>> {
        match self.mode {
            SessionMode::Persistent => {
                let session = self.shared_session().await?;
                match session.list_tools().await {
                    Err(e) if self.retry_after(&e) => {
                        self.invalidate(&session).await;
                        self.shared_session().await?.list_tools().await
                    }
                    outcome => outcome,
                }
            }
            SessionMode::PerCall => {
                let session = self.factory.open().await?;
                let outcome = session.list_tools().await;
                self.release(&session).await;
                outcome
            }
        }
    }

    /// Invoke one tool of this source.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> CoopResult<ToolCallResult> {
        match self.mode {
            // A 401 means the request was refused before it ran, so the
            // single retry keeps at-most-once semantics.
            SessionMode::Persistent => {
                let session = self.shared_session().await?;
                match session.call_tool(name, arguments.clone()).await {
                    Err(e) if self.retry_after(&e) => {
                        self.invalidate(&session).await;
                        self.shared_session().await?.call_tool(name, arguments).await
                    }
                    outcome => outcome,
                }
            }
            SessionMode::PerCall => {
                let session = self.factory.open().await?;
                let outcome = session.call_tool(name, arguments).await;
                self.release(&session).await;
                outcome
            }
        }
    }

    /// Close the shared session, if any.
    pub async fn close(&self) -> CoopResult<()> {
        let session = self.shared.lock().await.take();
        if let Some(session) = session {
            session.close().await?;
            info!(source = %self.source(), "Session closed");
        }
        Ok(())
    }
}

/// One remote tool, invoked through its source's [`SessionPool`].
pub struct McpTool {
    descriptor: ToolDescriptor,
    pool: Arc<SessionPool>,
}

impl McpTool {
    /// Wrap a discovered descriptor.
    pub fn new(descriptor: ToolDescriptor, pool: Arc<SessionPool>) -> Self {
        Self { descriptor, pool }
    }

    /// Source the tool belongs to.
    pub fn source(&self) -> &str {
        self.pool.source()
    }
}

#[async_trait]
impl Tool for McpTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, call: ToolCall) -> CoopResult<ToolResult> {
        let result = self
            .pool
            .call_tool(&self.descriptor.name, call.arguments)
            .await?;
        let text = result.agent_text();
        if result.is_error {
            Ok(ToolResult::error(call.id, text))
        } else {
            Ok(ToolResult::success(call.id, text))
        }
    }
}
