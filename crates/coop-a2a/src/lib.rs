//! Agent-to-agent delegation for Coop.
//!
//! A context/goal pair becomes an A2A `message/send` request. The reply text
//! is returned with a share link appended; every failure is turned into text
//! so delegation can be exposed to an agent as a plain tool.
//!
//! Peers are reached through [`PeerAgent`]: [`RemotePeer`] posts JSON-RPC over
//! HTTP, [`EmbeddedPeer`] drives an in-process [`AgentEngine`]. [`A2aServer`]
//! serves an engine to remote delegators.

pub mod client;
pub mod delegate;
pub mod embedded;
pub mod message;
pub mod server;
pub mod share;

pub use client::{PeerAgent, RemotePeer, DEFAULT_PEER_TIMEOUT, DEFAULT_PEER_URL};
pub use delegate::{Delegator, NO_RESPONSE};
pub use embedded::{AgentEngine, AgentEvent, EmbeddedPeer, Session};
pub use message::{Message, Part, Role, MESSAGE_SEND};
pub use server::A2aServer;
pub use share::ShareLink;
