//! Toolset registry for Coop.
//!
//! Sources are described by [`SourceConfig`] (stdio subprocess, streamable
//! HTTP, one-shot HTTP), opened through a [`SourceFactory`] that resolves
//! credentials on every session open, and aggregated with in-process tools by
//! the [`ToolsetRegistry`].

pub mod config;
pub mod factory;
pub mod registry;

pub use config::{AuthConfig, EndpointConfig, SourceConfig};
pub use factory::{Credentials, SourceFactory};
pub use registry::{SourceState, SourceStatus, ToolsetRegistry, BUILTIN_SOURCE};
