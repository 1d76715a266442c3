use crate::{CoopResult, ToolCall, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A schema-described capability as listed by a tool provider.
///
/// Deserializes directly from an MCP `tools/list` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name within one registry.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the tool arguments.
    #[serde(default = "default_input_schema", rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Creates a descriptor.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Trait implemented by everything an agent can invoke by name: in-process
/// tools as well as adapters over remote tool sessions.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The descriptor advertised to the calling agent.
    fn descriptor(&self) -> &ToolDescriptor;

    /// Executes the call.
    ///
    /// Business-level failures are returned as `Ok` with `is_error` set;
    /// `Err` is reserved for failures of the layer itself.
    async fn execute(&self, call: ToolCall) -> CoopResult<ToolResult>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_mcp_listing() {
        let json = r#"{"name":"list_tables","description":"List tables","inputSchema":{"type":"object","properties":{"dataset":{"type":"string"}}}}"#;
        let desc: ToolDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.name, "list_tables");
        assert_eq!(desc.input_schema["properties"]["dataset"]["type"], "string");
    }

    #[test]
    fn test_descriptor_defaults() {
        let desc: ToolDescriptor = serde_json::from_str(r#"{"name":"ping"}"#).unwrap();
        assert!(desc.description.is_empty());
        assert_eq!(desc.input_schema["type"], "object");
    }

    #[test]
    fn test_descriptor_serializes_camel_case_schema() {
        let desc = ToolDescriptor::new("t", "d", serde_json::json!({"type": "object"}));
        let json = serde_json::to_value(&desc).unwrap();
        assert!(json.get("inputSchema").is_some());
    }
}
