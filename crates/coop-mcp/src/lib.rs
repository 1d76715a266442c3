//! Model Context Protocol plumbing for Coop.
//!
//! - [`transport`]: the three wire bindings (subprocess stdio, streamable
//!   HTTP, one-shot JSON-RPC over HTTP) behind the [`Transport`] trait.
//! - [`compat`]: the discovery compatibility adapter for servers that reject
//!   optional `resources/list` / `prompts/list` calls.
//! - [`session`]: the initialize → discover → invoke → close handshake.
//! - [`tool`]: remote tools exposed as [`coop_core::Tool`]s, with persistent
//!   or per-call sessions.
//! - [`server`]: a stdio MCP server serving in-process tools.

pub mod compat;
pub mod jsonrpc;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tool;
pub mod transport;

pub use compat::{DiscoveryPolicy, DiscoveryShim};
pub use jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use protocol::{Content, InitializeResult, ToolCallResult, NO_OUTPUT};
pub use server::McpServer;
pub use session::ToolSession;
pub use tool::{McpTool, SessionFactory, SessionMode, SessionPool, TransportSessionFactory};
pub use transport::{
    HttpConfig, OneShotTransport, StdioConfig, StdioTransport, StreamableHttpTransport, Transport,
    TransportConfig, TransportKind,
};
