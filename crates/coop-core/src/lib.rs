//! Core types and error definitions for the Coop tool layer.
//!
//! This crate provides the foundational types shared across all Coop crates:
//! the error taxonomy, tool invocation requests and results, the [`Tool`]
//! abstraction and the logging setup used by process entry points.
//!
//! # Main types
//!
//! - [`CoopError`]: Failure taxonomy for transports, sessions, credentials and peers.
//! - [`CoopResult`]: Convenience alias for `Result<T, CoopError>`.
//! - [`ToolCall`]: A request to invoke a named tool with JSON arguments.
//! - [`ToolResult`]: The agent-facing textual outcome of a tool call.
//! - [`Tool`] / [`ToolDescriptor`]: An invokable, schema-described capability.

/// Logging construction owned by the process entry point.
pub mod logging;
/// Tool descriptor and the `Tool` trait.
pub mod tool;

pub use logging::{LogConfig, LogFormat, LogWriter};
pub use tool::{Tool, ToolDescriptor};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

// --- Error types ---

/// Top-level error type for the Coop tool layer.
///
/// The first five variants form the failure taxonomy seen by callers; the
/// remaining ones cover configuration and local plumbing.
#[derive(Debug, thiserror::Error)]
pub enum CoopError {
    /// The endpoint could not be reached, or the connection/child process died.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A frame or response had an unexpected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A bounded wait was exceeded. The operation was cancelled.
    #[error("Tool call timed out after {:.1}s: {operation}", .timeout.as_secs_f64())]
    Timeout {
        /// What was being waited on (e.g. `tools/call get_store_temperature`).
        operation: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// Ambient identity could not be resolved or refreshed.
    #[error("Credential error: {0}")]
    Credential(String),

    /// The remote endpoint executed the request and reported an error.
    #[error("Peer reported error {code}: {message}")]
    PeerReported {
        /// JSON-RPC error code, or the HTTP status for rejected requests.
        code: i64,
        /// Error message as sent by the peer.
        message: String,
    },

    /// Invalid or conflicting configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// No tool with this name is registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoopError {
    /// Name of the failure class, as shown to the calling agent.
    pub fn class(&self) -> &'static str {
        match self {
            CoopError::TransportUnavailable(_) => "TransportUnavailable",
            CoopError::Protocol(_) | CoopError::Json(_) => "ProtocolError",
            CoopError::Timeout { .. } => "ToolCallTimeout",
            CoopError::Credential(_) => "CredentialError",
            CoopError::PeerReported { .. } => "PeerReportedError",
            CoopError::Config(_) => "ConfigError",
            CoopError::UnknownTool(_) => "UnknownTool",
            CoopError::Io(_) => "IoError",
        }
    }

    /// Render the error as a string for an agent's reasoning loop.
    ///
    /// Always starts with `"Error"` and names the failure class.
    pub fn to_agent_text(&self) -> String {
        format!("Error ({}): {}", self.class(), self)
    }

    /// An HTTP 401 from the endpoint: the credentials were not accepted and
    /// the request was not processed. JSON-RPC error codes are negative, so
    /// they never collide with this.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, CoopError::PeerReported { code: 401, .. })
    }

    /// Shorthand for a [`CoopError::Timeout`].
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        CoopError::Timeout {
            operation: operation.into(),
            timeout,
        }
    }
}

/// A convenience `Result` alias using [`CoopError`].
pub type CoopResult<T> = Result<T, CoopError>;

// --- Tool types ---

/// A request to invoke a specific tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation identifier for this call.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments to pass to the tool.
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Creates a call with a fresh correlation id.
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }
}

/// The result returned after executing a [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The ID of the [`ToolCall`] this result corresponds to.
    pub call_id: String,
    /// The textual output produced by the tool.
    pub content: String,
    /// Whether the tool execution ended in an error.
    pub is_error: bool,
}

impl ToolResult {
    /// Creates a successful tool result.
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Creates an error tool result.
    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }

    /// Creates an error tool result from a layer failure.
    pub fn from_error(call_id: impl Into<String>, error: &CoopError) -> Self {
        Self::error(call_id, error.to_agent_text())
    }
}
