//! A2A `message/send` payloads.

use coop_core::{CoopError, CoopResult};
use coop_mcp::JsonRpcRequest;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// JSON-RPC method carrying one message to a peer agent.
pub const MESSAGE_SEND: &str = "message/send";

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The delegating side.
    User,
    /// The peer agent.
    Agent,
}

/// One part of a message. Only text parts are produced here; other kinds
/// are kept as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    /// Part kind, `text` for text parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Text payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Other fields, untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Part {
    /// A text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: Some("text".to_string()),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}

/// A delegation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique per message.
    pub message_id: String,
    /// Author.
    pub role: Role,
    /// Ordered parts.
    pub parts: Vec<Part>,
}

impl Message {
    /// A single-text message with a fresh id.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            role,
            parts: vec![Part::text(text)],
        }
    }

    /// A user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// An agent message.
    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Role::Agent, text)
    }

    /// Text of the first part that has any.
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| p.text.as_deref())
    }
}

/// `params` of a `message/send` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSendParams {
    /// The message.
    pub message: Message,
}

/// Wrap `message` in a `message/send` envelope with a fresh request id.
pub fn message_send(message: Message) -> CoopResult<JsonRpcRequest> {
    let params = serde_json::to_value(MessageSendParams { message })?;
    Ok(JsonRpcRequest::new(
        Uuid::new_v4().to_string(),
        MESSAGE_SEND,
        Some(params),
    ))
}

/// The delegation prompt for a context/goal pair.
pub fn compose_prompt(context: &str, goal: &str) -> String {
    format!("Context: {context}\nGoal: {goal}")
}

/// Extract the reply text from a raw `message/send` response.
///
/// An `error` member becomes [`CoopError::PeerReported`]. The reply is read
/// from `result.message.parts`, or from `result.parts` when the peer returns
/// the message itself as the result. Anything else is a protocol error that
/// embeds the raw payload.
pub fn reply_text(response: &Value) -> CoopResult<String> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = match error.get("message").and_then(Value::as_str) {
            Some(m) => m.to_string(),
            None => error.to_string(),
        };
        return Err(CoopError::PeerReported { code, message });
    }

    let parts = response
        .pointer("/result/message/parts")
        .or_else(|| response.pointer("/result/parts"))
        .and_then(Value::as_array);
    let text = parts.and_then(|parts| {
        parts
            .iter()
            .find_map(|p| p.get("text").and_then(Value::as_str))
    });
    match text {
        Some(text) => Ok(text.to_string()),
        None => Err(CoopError::Protocol(format!(
            "unexpected response format from peer agent: {response}"
        ))),
    }
}
