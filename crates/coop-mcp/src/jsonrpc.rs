//! JSON-RPC 2.0 framing shared by every transport and by the tool server.

use coop_core::{CoopError, CoopResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Protocol version string carried in every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;

/// Correlation id of a request. Peers may use numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id, as generated by [`crate::ToolSession`].
    Number(u64),
    /// String id, as generated for delegation envelopes.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        RequestId::Number(value)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId::String(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::String(value.to_string())
    }
}

/// A request expecting a correlated response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a request frame.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A fire-and-forget message without an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Creates a notification frame.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Error member of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Creates an error without data.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// A response frame. Exactly one of `result` and `error` is expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the request answered. `null` for parse errors.
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// A successful response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// A failed response.
    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Unwrap the payload, mapping an `error` member to
    /// [`CoopError::PeerReported`] and an empty response to a protocol error.
    pub fn into_result(self) -> CoopResult<Value> {
        if let Some(error) = self.error {
            return Err(CoopError::PeerReported {
                code: error.code,
                message: error.message,
            });
        }
        self.result.ok_or_else(|| {
            CoopError::Protocol("response carries neither result nor error".to_string())
        })
    }

    /// Check that this response answers `expected`.
    pub fn ensure_id(&self, expected: &RequestId) -> CoopResult<()> {
        match &self.id {
            Some(id) if id == expected => Ok(()),
            Some(id) => Err(CoopError::Protocol(format!(
                "response id {id} does not match request id {expected}"
            ))),
            // A null id is only legal for errors the peer could not attribute.
            None if self.error.is_some() => Ok(()),
            None => Err(CoopError::Protocol(format!(
                "response to request {expected} carries no id"
            ))),
        }
    }
}

/// Any frame read off a channel.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Peer-initiated request.
    Request(JsonRpcRequest),
    /// Peer-initiated notification.
    Notification(JsonRpcNotification),
    /// Response to one of our requests.
    Response(JsonRpcResponse),
}

impl Incoming {
    /// Classify and decode one frame.
    pub fn parse(frame: &str) -> CoopResult<Self> {
        let value: Value = serde_json::from_str(frame)
            .map_err(|e| CoopError::Protocol(format!("malformed frame: {e}")))?;
        Self::from_value(value)
    }

    /// Classify an already-decoded frame.
    pub fn from_value(value: Value) -> CoopResult<Self> {
        if !value.is_object() {
            return Err(CoopError::Protocol(format!(
                "frame is not a JSON object: {value}"
            )));
        }
        let has_method = value.get("method").is_some();
        let has_id = value.get("id").is_some_and(|id| !id.is_null());
        let decoded = match (has_method, has_id) {
            (true, true) => serde_json::from_value(value).map(Incoming::Request),
            (true, false) => serde_json::from_value(value).map(Incoming::Notification),
            (false, _) => serde_json::from_value(value).map(Incoming::Response),
        };
        decoded.map_err(|e| CoopError::Protocol(format!("invalid JSON-RPC frame: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest::new(1, "tools/list", None);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert!(json.get("params").is_none());
    }

    #[test]
    fn test_string_ids_roundtrip() {
        let req = JsonRpcRequest::new("abc-123", "message/send", Some(json!({})));
        let back: JsonRpcRequest =
            serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
        assert_eq!(back.id, RequestId::String("abc-123".into()));
    }

    #[test]
    fn test_error_maps_to_peer_reported() {
        let resp: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 3,
            "error": {"code": -32602, "message": "Invalid params"}
        }))
        .unwrap();
        match resp.into_result() {
            Err(CoopError::PeerReported { code, message }) => {
                assert_eq!(code, -32602);
                assert_eq!(message, "Invalid params");
            }
            other => panic!("expected PeerReported, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_response_is_protocol_error() {
        let resp: JsonRpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 3})).unwrap();
        assert!(matches!(resp.into_result(), Err(CoopError::Protocol(_))));
    }

    #[test]
    fn test_ensure_id_mismatch() {
        let resp = JsonRpcResponse::success(RequestId::Number(2), json!({}));
        assert!(resp.ensure_id(&RequestId::Number(2)).is_ok());
        assert!(matches!(
            resp.ensure_id(&RequestId::Number(7)),
            Err(CoopError::Protocol(_))
        ));
    }

    #[test]
    fn test_incoming_classification() {
        assert!(matches!(
            Incoming::parse(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap(),
            Incoming::Request(_)
        ));
        assert!(matches!(
            Incoming::parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap(),
            Incoming::Notification(_)
        ));
        assert!(matches!(
            Incoming::parse(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap(),
            Incoming::Response(_)
        ));
        assert!(matches!(
            Incoming::parse("not json"),
            Err(CoopError::Protocol(_))
        ));
        assert!(matches!(Incoming::parse("[1,2]"), Err(CoopError::Protocol(_))));
    }

    #[test]
    fn test_null_id_failure_serializes_id() {
        let resp = JsonRpcResponse::failure(None, JsonRpcError::new(PARSE_ERROR, "Parse error"));
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("id").unwrap().is_null());
        assert!(json.get("result").is_none());
    }
}
