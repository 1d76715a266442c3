//! MCP (Model Context Protocol) message payloads carried inside JSON-RPC frames.

use coop_core::ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol revision announced in `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Method names used by the client and the server.
pub mod methods {
    /// Handshake request.
    pub const INITIALIZE: &str = "initialize";
    /// Handshake completion notification.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Liveness check, valid in both directions.
    pub const PING: &str = "ping";
    /// Tool discovery.
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation.
    pub const TOOLS_CALL: &str = "tools/call";
    /// Optional resource discovery.
    pub const RESOURCES_LIST: &str = "resources/list";
    /// Optional prompt discovery.
    pub const PROMPTS_LIST: &str = "prompts/list";
    /// Cancellation of an in-flight request.
    pub const CANCELLED: &str = "notifications/cancelled";
}

/// Name and version of a client or server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    /// Product name.
    pub name: String,
    /// Product version.
    #[serde(default)]
    pub version: String,
}

impl Implementation {
    /// This crate, as announced to servers.
    pub fn coop_client() -> Self {
        Self {
            name: "coop".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Capabilities advertised by a server in its `initialize` result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Present when the server offers tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    /// Present when the server offers resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    /// Present when the server offers prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol revision chosen by the server.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// What the server supports.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Who the server is.
    #[serde(default, rename = "serverInfo", skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
    /// Free-form usage hints for the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// One page of `tools/list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// Tools on this page.
    pub tools: Vec<ToolDescriptor>,
    /// Cursor of the next page, if any.
    #[serde(default, rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// One page of `resources/list`. Entries are kept opaque.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListResourcesResult {
    /// Resources on this page.
    #[serde(default)]
    pub resources: Vec<Value>,
    /// Cursor of the next page, if any.
    #[serde(default, rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// One page of `prompts/list`. Entries are kept opaque.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPromptsResult {
    /// Prompts on this page.
    #[serde(default)]
    pub prompts: Vec<Value>,
    /// Cursor of the next page, if any.
    #[serde(default, rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of `tools/call`.
///
/// `content` is required: a result without it is a protocol violation and
/// fails to deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Content items in server order.
    pub content: Vec<Content>,
    /// Whether the tool itself reported a failure.
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// A single-text successful result.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    /// A single-text failed result.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: true,
        }
    }

    /// All text items joined with a newline, in server order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// [`Self::text`], or a notice when the result carries no text.
    pub fn agent_text(&self) -> String {
        let text = self.text();
        if !text.is_empty() {
            return text;
        }
        match self.content.iter().filter(|c| c.text.is_none()).count() {
            0 => NO_OUTPUT.to_string(),
            1 => "(1 non-text content item omitted)".to_string(),
            n => format!("({n} non-text content items omitted)"),
        }
    }
}

/// Stand-in for a result without any content.
pub const NO_OUTPUT: &str = "(tool returned no output)";

/// One content item. Non-text items keep their fields in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// `text`, `image`, `resource`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Present on text items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Everything else, untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Content {
    /// A text item.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}
