//! Wire bindings to tool-providing endpoints.
//!
//! A [`Transport`] sends one request frame and waits for the frame carrying
//! the same id. Three bindings exist: a subprocess speaking newline-delimited
//! JSON-RPC on stdio, a persistent streamable HTTP connection, and one-shot
//! JSON-RPC over plain HTTP POSTs.

mod oneshot;
mod stdio;
mod streamable_http;

pub use oneshot::OneShotTransport;
pub use stdio::StdioTransport;
pub use streamable_http::StreamableHttpTransport;

use crate::jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use coop_core::{CoopError, CoopResult};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default per-call timeout of a stdio binding.
pub const DEFAULT_STDIO_TIMEOUT: Duration = Duration::from_secs(5);
/// Default per-call timeout of the HTTP bindings.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Default TCP connect timeout of the HTTP bindings.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which wire binding a transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Subprocess with JSON-RPC on stdin/stdout.
    Stdio,
    /// Persistent MCP streamable HTTP.
    StreamableHttp,
    /// One POST per call.
    OneShotHttp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Stdio => "stdio",
            TransportKind::StreamableHttp => "streamable_http",
            TransportKind::OneShotHttp => "oneshot_http",
        })
    }
}

/// An open channel to one endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The binding this transport implements.
    fn kind(&self) -> TransportKind;

    /// Per-call deadline configured for this binding.
    fn call_timeout(&self) -> Duration;

    /// Send `request` and wait at most `timeout` for its response.
    ///
    /// A JSON-RPC `error` member is returned inside the response, not as `Err`.
    /// On timeout the underlying resource (child process or connection) is
    /// released before [`CoopError::Timeout`] is returned.
    async fn request(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> CoopResult<JsonRpcResponse>;

    /// Send a notification. No response is awaited.
    async fn notify(&self, notification: JsonRpcNotification) -> CoopResult<()>;

    /// Release the channel. Safe to call more than once.
    async fn close(&self) -> CoopResult<()>;

    /// Whether the channel has been closed or has died.
    fn is_closed(&self) -> bool;
}

/// Launch parameters of a stdio tool server.
#[derive(Debug, Clone)]
pub struct StdioConfig {
    /// Executable.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Environment overrides applied on top of the inherited environment.
    pub env: HashMap<String, String>,
    /// Inherit the parent environment. When false only `env` is passed.
    pub inherit_env: bool,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Per-call deadline.
    pub timeout: Duration,
}

impl StdioConfig {
    /// A config running `command` with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            inherit_env: true,
            cwd: None,
            timeout: DEFAULT_STDIO_TIMEOUT,
        }
    }

    /// Set the arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add one environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Endpoint and static headers of an HTTP binding.
#[derive(Clone)]
pub struct HttpConfig {
    /// Endpoint URL.
    pub url: String,
    /// Headers attached to every request (credentials, attribution).
    pub headers: Vec<(String, String)>,
    /// Per-call deadline.
    pub timeout: Duration,
    /// TCP connect deadline.
    pub connect_timeout: Duration,
}

impl HttpConfig {
    /// A config for `url` without extra headers.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout: DEFAULT_HTTP_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Add one header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add several headers.
    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Set the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// Header values carry tokens and API keys; only names are printed.
impl fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("HttpConfig")
            .field("url", &self.url)
            .field("headers", &names)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Everything needed to open one transport.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// Spawn a subprocess.
    Stdio(StdioConfig),
    /// Persistent streamable HTTP.
    StreamableHttp(HttpConfig),
    /// One POST per call.
    OneShotHttp(HttpConfig),
}

impl TransportConfig {
    /// The binding this config opens.
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Stdio(_) => TransportKind::Stdio,
            TransportConfig::StreamableHttp(_) => TransportKind::StreamableHttp,
            TransportConfig::OneShotHttp(_) => TransportKind::OneShotHttp,
        }
    }
}

/// Open the transport described by `config`.
pub async fn open(config: &TransportConfig) -> CoopResult<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match config {
        TransportConfig::Stdio(c) => Arc::new(StdioTransport::spawn(c)?),
        TransportConfig::StreamableHttp(c) => Arc::new(StreamableHttpTransport::new(c)?),
        TransportConfig::OneShotHttp(c) => Arc::new(OneShotTransport::new(c)?),
    };
    Ok(transport)
}

// --- HTTP helpers shared by the two HTTP bindings ---

const SENSITIVE_HEADERS: [&str; 3] = ["authorization", "x-goog-api-key", "proxy-authorization"];

pub(crate) fn build_http_client(config: &HttpConfig) -> CoopResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| CoopError::Config(format!("Invalid header name '{name}': {e}")))?;
        let mut header_value = HeaderValue::from_str(value)
            .map_err(|e| CoopError::Config(format!("Invalid value for header '{name}': {e}")))?;
        if SENSITIVE_HEADERS.contains(&header_name.as_str()) {
            header_value.set_sensitive(true);
        }
        headers.insert(header_name, header_value);
    }
    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(config.connect_timeout)
        .build()
        .map_err(|e| CoopError::Config(format!("Failed to build HTTP client: {e}")))
}

pub(crate) fn map_send_error(error: reqwest::Error, url: &str) -> CoopError {
    if error.is_connect() {
        CoopError::TransportUnavailable(format!("Failed to connect to {url}: {error}"))
    } else {
        CoopError::TransportUnavailable(format!("Request to {url} failed: {error}"))
    }
}

/// 4xx means the peer saw and rejected the request; 5xx means it is unusable,
/// unless the body carries a JSON-RPC `error` member the peer produced.
pub(crate) async fn check_status(response: reqwest::Response) -> CoopResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

#[derive(Deserialize)]
struct ErrorBody {
    error: JsonRpcError,
}

fn status_error(status: reqwest::StatusCode, body: &str) -> CoopError {
    if let Ok(ErrorBody { error }) = serde_json::from_str::<ErrorBody>(body) {
        // 401 keeps the HTTP code so callers can re-authenticate.
        let code = if status == reqwest::StatusCode::UNAUTHORIZED {
            i64::from(status.as_u16())
        } else {
            error.code
        };
        return CoopError::PeerReported {
            code,
            message: error.message,
        };
    }
    let detail = truncate(body, 512);
    if status.is_client_error() {
        CoopError::PeerReported {
            code: i64::from(status.as_u16()),
            message: if detail.is_empty() {
                status.to_string()
            } else {
                format!("{status}: {detail}")
            },
        }
    } else {
        CoopError::TransportUnavailable(format!("Endpoint returned {status}: {detail}"))
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_debug_hides_header_values() {
        let config = HttpConfig::new("https://example.test/mcp")
            .with_header("X-Goog-Api-Key", "secret-key-value");
        let printed = format!("{config:?}");
        assert!(printed.contains("X-Goog-Api-Key"));
        assert!(!printed.contains("secret-key-value"));
    }

    #[test]
    fn test_invalid_header_is_config_error() {
        let config = HttpConfig::new("http://localhost").with_header("bad header", "v");
        assert!(matches!(
            build_http_client(&config),
            Err(CoopError::Config(_))
        ));
    }

    #[test]
    fn test_stdio_config_builder() {
        let config = StdioConfig::new("coop")
            .with_args(["serve-tools"])
            .with_env("COOP_LOG_LEVEL", "warn")
            .with_timeout(Duration::from_secs(300));
        assert_eq!(config.args, vec!["serve-tools".to_string()]);
        assert!(config.inherit_env);
        assert_eq!(config.timeout.as_secs(), 300);
    }

    #[test]
    fn test_server_error_with_jsonrpc_body_is_peer_reported() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32603,"message":"backend exploded"}}"#;
        let err = status_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, body);
        assert!(
            matches!(err, CoopError::PeerReported { code: -32603, ref message } if message == "backend exploded"),
            "{err:?}"
        );
    }

    #[test]
    fn test_server_error_with_plain_body_is_unavailable() {
        let err = status_error(reqwest::StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert!(matches!(err, CoopError::TransportUnavailable(_)), "{err:?}");
    }

    #[test]
    fn test_unauthorized_keeps_http_code() {
        let body = r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32001,"message":"token expired"}}"#;
        let err = status_error(reqwest::StatusCode::UNAUTHORIZED, body);
        assert!(err.is_unauthorized(), "{err:?}");
        assert!(err.to_string().contains("token expired"));

        let err = status_error(reqwest::StatusCode::UNAUTHORIZED, "token expired");
        assert!(err.is_unauthorized(), "{err:?}");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("ñañaña", 2), "ña...");
    }
}
