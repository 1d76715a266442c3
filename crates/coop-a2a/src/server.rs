//! The peer side: an [`AgentEngine`] served over A2A `message/send`.

use crate::client::PeerAgent;
use crate::embedded::{AgentEngine, EmbeddedPeer};
use crate::message::{Message, MessageSendParams, MESSAGE_SEND};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use coop_core::{CoopError, CoopResult};
use coop_mcp::jsonrpc::{
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use coop_mcp::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Shared handler state.
struct AppState {
    peer: EmbeddedPeer,
    card: Value,
}

/// Exposes one engine to remote delegators.
pub struct A2aServer;

impl A2aServer {
    /// Router with `POST /` for JSON-RPC, an agent card and a health check.
    pub fn build(engine: Arc<dyn AgentEngine>, description: &str, timeout: Duration) -> Router {
        let card = json!({
            "name": engine.app_name(),
            "description": description,
            "version": env!("CARGO_PKG_VERSION"),
            "capabilities": {"streaming": false},
            "defaultInputModes": ["text"],
            "defaultOutputModes": ["text"],
        });
        let state = Arc::new(AppState {
            peer: EmbeddedPeer::new(engine, timeout),
            card,
        });

        Router::new()
            .route("/", post(rpc_handler))
            .route("/.well-known/agent.json", get(card_handler))
            .route("/health", get(health_handler))
            .with_state(state)
    }

    /// Serve `router` on `listener` until the process ends.
    pub async fn serve(listener: TcpListener, router: Router) -> CoopResult<()> {
        info!(addr = ?listener.local_addr().ok(), "A2A server listening");
        axum::serve(listener, router).await.map_err(CoopError::Io)
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn card_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.card.clone())
}

async fn rpc_handler(State(state): State<Arc<AppState>>, body: String) -> Json<JsonRpcResponse> {
    Json(dispatch(&state, &body).await)
}

async fn dispatch(state: &AppState, body: &str) -> JsonRpcResponse {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            return JsonRpcResponse::failure(
                None,
                JsonRpcError::new(PARSE_ERROR, format!("Parse error: {e}")),
            )
        }
    };
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            return JsonRpcResponse::failure(
                None,
                JsonRpcError::new(INVALID_REQUEST, format!("Invalid request: {e}")),
            )
        }
    };

    if request.method != MESSAGE_SEND {
        return JsonRpcResponse::failure(
            Some(request.id),
            JsonRpcError::new(METHOD_NOT_FOUND, format!("Method not found: {}", request.method)),
        );
    }

    let params = request.params.unwrap_or(Value::Null);
    let message = match serde_json::from_value::<MessageSendParams>(params) {
        Ok(p) => p.message,
        Err(e) => {
            return JsonRpcResponse::failure(
                Some(request.id),
                JsonRpcError::new(INVALID_PARAMS, format!("Invalid params: {e}")),
            )
        }
    };

    match state.peer.send(message).await {
        Ok(Some(text)) => {
            let reply = json!({"message": Message::agent(text)});
            JsonRpcResponse::success(request.id, reply)
        }
        Ok(None) => JsonRpcResponse::failure(
            Some(request.id),
            JsonRpcError::new(INTERNAL_ERROR, "agent produced no text reply"),
        ),
        Err(e) => {
            warn!(error = %e, "Agent run failed");
            JsonRpcResponse::failure(
                Some(request.id),
                JsonRpcError::new(INTERNAL_ERROR, e.to_string()),
            )
        }
    }
}
