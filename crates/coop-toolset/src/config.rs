//! Declarative description of tool sources.
//!
//! ```toml
//! [sources.analytics]
//! transport = "streamable_http"
//! url = "https://bigquery.googleapis.com/mcp"
//! auth = { type = "adc", scopes = ["https://www.googleapis.com/auth/bigquery"] }
//!
//! [sources.local]
//! transport = "stdio"
//! command = "coop"
//! args = ["serve-tools"]
//! mode = "per_call"
//! timeout_secs = 300
//! ```

use coop_mcp::{DiscoveryPolicy, SessionMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// How one source is reached and managed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Wire binding.
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
    /// Session lifetime.
    #[serde(default)]
    pub mode: SessionMode,
    /// Handling of rejected optional discovery calls.
    #[serde(default)]
    pub discovery: DiscoveryPolicy,
    /// Per-call deadline. The binding default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl SourceConfig {
    /// A persistent source with default discovery and timeout.
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self {
            endpoint,
            mode: SessionMode::default(),
            discovery: DiscoveryPolicy::default(),
            timeout_secs: None,
        }
    }

    /// Set the session mode.
    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Per-call deadline, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Wire binding of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum EndpointConfig {
    /// A subprocess speaking newline-delimited JSON-RPC.
    Stdio {
        /// Program to run.
        command: String,
        /// Arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Environment overrides.
        #[serde(default)]
        env: BTreeMap<String, String>,
        /// Inherit the parent environment.
        #[serde(default = "default_true")]
        inherit_env: bool,
        /// Working directory.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    /// Persistent streamable HTTP.
    StreamableHttp {
        /// Endpoint URL.
        url: String,
        /// Credentials attached at open.
        #[serde(default)]
        auth: AuthConfig,
    },
    /// One POST per call.
    OneShot {
        /// Endpoint URL.
        url: String,
        /// Credentials attached at open.
        #[serde(default)]
        auth: AuthConfig,
    },
}

fn default_true() -> bool {
    true
}

/// Credentials of an HTTP source. Resolved again on every session open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No credentials.
    #[default]
    None,
    /// Static API key read from an environment variable.
    ApiKey {
        /// Variable holding the key.
        env: String,
    },
    /// Application-default credentials.
    Adc {
        /// OAuth scopes.
        scopes: Vec<String>,
        /// Project for quota attribution. Falls back to the ambient project.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_id: Option<String>,
    },
}
