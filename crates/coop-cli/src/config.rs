use coop_a2a::{Delegator, RemotePeer, DEFAULT_PEER_TIMEOUT, DEFAULT_PEER_URL};
use coop_auth::scopes;
use coop_builtins::{local_tools, ConsultTool};
use coop_core::{LogConfig, LogFormat, LogWriter};
use coop_mcp::SessionMode;
use coop_toolset::{AuthConfig, EndpointConfig, SourceConfig, ToolsetRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const MAPS_MCP_URL: &str = "https://mapstools.googleapis.com/mcp";
pub const ANALYTICS_MCP_URL: &str = "https://bigquery.googleapis.com/mcp";
pub const LOCAL_TOOL_TIMEOUT: Duration = Duration::from_secs(300);
/// Source name of the builtin tools when they run behind `serve-tools`.
pub const LOCAL_SOURCE: &str = "local";

/// Contents of `coop.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoopConfig {
    #[serde(default = "default_logging")]
    pub logging: LogConfig,
    #[serde(default = "default_sources")]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub local_tools: LocalToolsConfig,
}

/// Where the builtin tools run.
///
/// By default they are reached through the `local` stdio source. With
/// `in_process = true` they are registered directly and the `local` source
/// is not started.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalToolsConfig {
    #[serde(default)]
    pub in_process: bool,
}

/// Where `consult_marketing_expert` delegates to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    #[serde(default = "default_peer_url")]
    pub url: String,
    #[serde(default = "default_peer_timeout")]
    pub timeout_secs: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            url: default_peer_url(),
            timeout_secs: default_peer_timeout(),
        }
    }
}

impl PeerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CoopConfig {
    fn default() -> Self {
        Self {
            logging: default_logging(),
            sources: default_sources(),
            peer: PeerConfig::default(),
            local_tools: LocalToolsConfig::default(),
        }
    }
}

fn default_peer_url() -> String {
    DEFAULT_PEER_URL.to_string()
}

fn default_peer_timeout() -> u64 {
    DEFAULT_PEER_TIMEOUT.as_secs()
}

// stdout belongs to command output, or to protocol frames under serve-tools.
fn default_logging() -> LogConfig {
    LogConfig {
        level: "warn".to_string(),
        format: LogFormat::Compact,
        writer: LogWriter::Stderr,
        ..LogConfig::default()
    }
}

/// maps, analytics and the local stdio tool server.
pub fn default_sources() -> BTreeMap<String, SourceConfig> {
    let mut sources = BTreeMap::new();
    sources.insert(
        "maps".to_string(),
        SourceConfig::new(EndpointConfig::StreamableHttp {
            url: MAPS_MCP_URL.to_string(),
            auth: AuthConfig::ApiKey {
                env: "MAPS_API_KEY".to_string(),
            },
        }),
    );
    sources.insert(
        "analytics".to_string(),
        SourceConfig::new(EndpointConfig::StreamableHttp {
            url: ANALYTICS_MCP_URL.to_string(),
            auth: AuthConfig::Adc {
                scopes: vec![scopes::BIGQUERY.to_string()],
                project_id: None,
            },
        }),
    );
    sources.insert(
        LOCAL_SOURCE.to_string(),
        SourceConfig::new(EndpointConfig::Stdio {
            command: self_command(),
            args: vec!["serve-tools".to_string()],
            env: BTreeMap::new(),
            inherit_env: true,
            cwd: None,
        })
        .with_mode(SessionMode::PerCall)
        .with_timeout(LOCAL_TOOL_TIMEOUT),
    );
    sources
}

fn self_command() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.to_str().map(str::to_string))
        .unwrap_or_else(|| "coop".to_string())
}

impl CoopConfig {
    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {e}", path.display())
        })?;
        toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("Invalid config file '{}': {e}", path.display()))
    }

    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(level) = var("COOP_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(url) = var("COOP_PEER_URL") {
            self.peer.url = url;
        }
        if let Some(project) = var("GOOGLE_CLOUD_PROJECT") {
            for source in self.sources.values_mut() {
                if let EndpointConfig::StreamableHttp { auth, .. } | EndpointConfig::OneShot { auth, .. } =
                    &mut source.endpoint
                {
                    if let AuthConfig::Adc { project_id, .. } = auth {
                        project_id.get_or_insert(project.clone());
                    }
                }
            }
        }
        if let Some(flag) = var("COOP_LOCAL_TOOLS_IN_PROCESS") {
            self.local_tools.in_process = flag
                .parse()
                .map_err(|e| anyhow::anyhow!("COOP_LOCAL_TOOLS_IN_PROCESS must be true or false: {e}"))?;
        }
        if let Some(secs) = var("COOP_LOCAL_TOOL_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| anyhow::anyhow!("COOP_LOCAL_TOOL_TIMEOUT_SECS must be a number of seconds: {e}"))?;
            if let Some(local) = self.sources.get_mut(LOCAL_SOURCE) {
                local.timeout_secs = Some(secs);
            }
        }
        Ok(())
    }

    /// Delegation client for the configured peer.
    pub fn delegator(&self) -> anyhow::Result<Delegator> {
        let peer = RemotePeer::with_timeout(self.peer.url.clone(), self.peer.timeout())?;
        Ok(Delegator::new(Arc::new(peer)))
    }

    /// Registry over the configured sources plus the in-process tools.
    pub fn registry(&self) -> anyhow::Result<ToolsetRegistry> {
        let mut sources = self.sources.clone();
        if self.local_tools.in_process {
            sources.remove(LOCAL_SOURCE);
        }
        let mut registry = ToolsetRegistry::from_config(&sources)?;
        if self.local_tools.in_process {
            for tool in local_tools() {
                registry.register_tool(tool)?;
            }
        }
        registry.register_tool(Arc::new(ConsultTool::new(Arc::new(self.delegator()?))))?;
        Ok(registry)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_have_three_sources() {
        let config = CoopConfig::default();
        let names: Vec<&str> = config.sources.keys().map(String::as_str).collect();
        assert_eq!(names, ["analytics", "local", "maps"]);
        let local = &config.sources["local"];
        assert_eq!(local.mode, SessionMode::PerCall);
        assert_eq!(local.timeout(), Some(LOCAL_TOOL_TIMEOUT));
        assert_eq!(config.logging.writer, LogWriter::Stderr);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("COOP_LOG_LEVEL", "debug"),
            ("COOP_PEER_URL", "http://peer:9000/"),
            ("GOOGLE_CLOUD_PROJECT", "save-the-chickens"),
            ("COOP_LOCAL_TOOL_TIMEOUT_SECS", "42"),
        ]
        .into();
        let mut config = CoopConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.peer.url, "http://peer:9000/");
        assert_eq!(config.sources["local"].timeout_secs, Some(42));
        match &config.sources["analytics"].endpoint {
            EndpointConfig::StreamableHttp {
                auth: AuthConfig::Adc { project_id, .. },
                ..
            } => assert_eq!(project_id.as_deref(), Some("save-the-chickens")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bad_timeout_override() {
        let mut config = CoopConfig::default();
        let result = config.apply_overrides(|k| {
            (k == "COOP_LOCAL_TOOL_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_load_file_replaces_sources() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[logging]
level = "info"
format = "json"

[peer]
url = "http://marketing:8001/"

[sources.maps]
transport = "streamable_http"
url = "https://maps.example/mcp"
auth = {{ type = "api_key", env = "MAPS_API_KEY" }}
discovery = "skip"
"#
        )
        .unwrap();

        let config = CoopConfig::load(file.path()).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.peer.url, "http://marketing:8001/");
        assert_eq!(config.peer.timeout_secs, 60);
    }

    #[tokio::test]
    async fn test_in_process_local_tools() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[local_tools]
in_process = true

[sources.local]
transport = "stdio"
command = "/nonexistent/coop"
args = ["serve-tools"]
"#
        )
        .unwrap();
        let config = CoopConfig::load(file.path()).unwrap();
        assert!(config.local_tools.in_process);

        let registry = config.registry().unwrap();
        let names: Vec<String> = registry
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["get_store_temperature", "consult_marketing_expert"]);
        // The stdio source is never started.
        assert!(registry.statuses().await.is_empty());
        assert_eq!(registry.source_of("get_store_temperature").await.as_deref(), Some("builtin"));

        let result = registry
            .call_tool("get_store_temperature", serde_json::json!({"store_id": "S003"}))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.content.contains("S003"));
    }

    #[tokio::test]
    async fn test_stdio_local_tools_by_default() {
        let mut config = CoopConfig::default();
        config.sources.retain(|name, _| name == LOCAL_SOURCE);
        if let EndpointConfig::Stdio { command, .. } = &mut config.sources.get_mut(LOCAL_SOURCE).unwrap().endpoint {
            *command = "/nonexistent/coop".to_string();
        }

        let registry = config.registry().unwrap();
        let names: Vec<String> = registry
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["consult_marketing_expert"]);
        let statuses = registry.statuses().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].source, LOCAL_SOURCE);
    }

    #[test]
    fn test_in_process_env_override() {
        let mut config = CoopConfig::default();
        config
            .apply_overrides(|k| (k == "COOP_LOCAL_TOOLS_IN_PROCESS").then(|| "true".to_string()))
            .unwrap();
        assert!(config.local_tools.in_process);
        assert!(config
            .apply_overrides(|k| (k == "COOP_LOCAL_TOOLS_IN_PROCESS").then(|| "yes".to_string()))
            .is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = CoopConfig::load(Path::new("/nonexistent/coop.toml")).unwrap();
        assert_eq!(config.sources.len(), 3);
    }
}
