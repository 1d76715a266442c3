//! One tool namespace over many sources.

use crate::config::SourceConfig;
use crate::factory::SourceFactory;
use coop_core::{CoopError, CoopResult, Tool, ToolCall, ToolDescriptor, ToolResult};
use coop_mcp::{McpTool, SessionFactory, SessionMode, SessionPool};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Name under which in-process tools are reported.
pub const BUILTIN_SOURCE: &str = "builtin";

/// Outcome of materializing one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceStatus {
    /// Discovery succeeded.
    Ready {
        /// Number of tools exposed.
        tools: usize,
    },
    /// The source could not be reached; its tools are absent.
    Unavailable {
        /// Agent-readable failure text.
        reason: String,
    },
}

/// Status of one named source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceState {
    /// Source name.
    pub source: String,
    /// Its status.
    #[serde(flatten)]
    pub status: SourceStatus,
}

struct Entry {
    tool: Arc<dyn Tool>,
    source: String,
}

/// Result of the one-time initialization.
struct Catalog {
    tools: HashMap<String, Entry>,
    order: Vec<String>,
    statuses: Vec<SourceState>,
    conflicts: Vec<String>,
}

impl Catalog {
    fn insert(&mut self, tool: Arc<dyn Tool>, source: &str) {
        let name = tool.descriptor().name.clone();
        if let Some(existing) = self.tools.get(&name) {
            self.conflicts.push(format!(
                "tool '{name}' is exposed by both '{}' and '{source}'",
                existing.source
            ));
            return;
        }
        self.order.push(name.clone());
        self.tools.insert(
            name,
            Entry {
                tool,
                source: source.to_string(),
            },
        );
    }
}

/// Aggregates tool sources into a single capability list.
///
/// Sources are materialized concurrently on first use. A source that fails
/// (credentials, transport, protocol) is recorded as unavailable and the
/// others are still served. A name exposed twice is a configuration error.
pub struct ToolsetRegistry {
    pools: Vec<Arc<SessionPool>>,
    local: Vec<Arc<dyn Tool>>,
    catalog: OnceCell<Catalog>,
}

impl Default for ToolsetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolsetRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            pools: Vec::new(),
            local: Vec::new(),
            catalog: OnceCell::new(),
        }
    }

    /// A registry over configured sources, in name order.
    pub fn from_config(sources: &BTreeMap<String, SourceConfig>) -> CoopResult<Self> {
        let mut registry = Self::new();
        for (name, config) in sources {
            let factory = SourceFactory::from_config(name.clone(), config);
            registry.add_source(Arc::new(factory), config.mode)?;
        }
        Ok(registry)
    }

    /// Add a remote source. Source names must be unique.
    pub fn add_source(&mut self, factory: Arc<dyn SessionFactory>, mode: SessionMode) -> CoopResult<()> {
        let name = factory.source();
        if name == BUILTIN_SOURCE || self.pools.iter().any(|p| p.source() == name) {
            return Err(CoopError::Config(format!("duplicate source name '{name}'")));
        }
        self.pools.push(Arc::new(SessionPool::new(factory, mode)));
        Ok(())
    }

    /// Register an in-process tool.
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) -> CoopResult<()> {
        let name = &tool.descriptor().name;
        if self.local.iter().any(|t| &t.descriptor().name == name) {
            return Err(CoopError::Config(format!(
                "tool '{name}' is already registered"
            )));
        }
        if let Some(catalog) = self.catalog.get_mut() {
            if let Some(existing) = catalog.tools.get(name) {
                return Err(CoopError::Config(format!(
                    "tool '{name}' is already exposed by '{}'",
                    existing.source
                )));
            }
            catalog.insert(tool.clone(), BUILTIN_SOURCE);
        }
        self.local.push(tool);
        Ok(())
    }

    async fn catalog(&self) -> &Catalog {
        self.catalog.get_or_init(|| self.materialize()).await
    }

    async fn materialize(&self) -> Catalog {
        let discovered = join_all(self.pools.iter().map(|pool| async move {
            (pool.clone(), pool.list_tools().await)
        }))
        .await;

        let mut catalog = Catalog {
            tools: HashMap::new(),
            order: Vec::new(),
            statuses: Vec::new(),
            conflicts: Vec::new(),
        };
        for tool in &self.local {
            catalog.insert(tool.clone(), BUILTIN_SOURCE);
        }

        for (pool, outcome) in discovered {
            let source = pool.source().to_string();
            let status = match outcome {
                Ok(descriptors) => {
                    info!(source = %source, tools = descriptors.len(), "Source ready");
                    let count = descriptors.len();
                    for descriptor in descriptors {
                        let tool: Arc<dyn Tool> = Arc::new(McpTool::new(descriptor, pool.clone()));
                        catalog.insert(tool, &source);
                    }
                    SourceStatus::Ready { tools: count }
                }
                Err(e) => {
                    warn!(source = %source, error = %e, "Source unavailable");
                    SourceStatus::Unavailable {
                        reason: e.to_agent_text(),
                    }
                }
            };
            catalog.statuses.push(SourceState { source, status });
        }

        for conflict in &catalog.conflicts {
            warn!(conflict = %conflict, "Tool name collision");
        }
        catalog
    }

    /// Materialize every source once. Later calls return the same outcome.
    pub async fn initialize(&self) -> CoopResult<()> {
        let catalog = self.catalog().await;
        if catalog.conflicts.is_empty() {
            Ok(())
        } else {
            Err(CoopError::Config(catalog.conflicts.join("; ")))
        }
    }

    /// Descriptors of every available tool.
    pub async fn list_tools(&self) -> CoopResult<Vec<ToolDescriptor>> {
        self.initialize().await?;
        let catalog = self.catalog().await;
        Ok(catalog
            .order
            .iter()
            .filter_map(|name| catalog.tools.get(name))
            .map(|entry| entry.tool.descriptor().clone())
            .collect())
    }

    /// Source owning `name`, if the tool is available.
    pub async fn source_of(&self, name: &str) -> Option<String> {
        self.catalog()
            .await
            .tools
            .get(name)
            .map(|entry| entry.source.clone())
    }

    /// Invoke `name`, returning typed failures.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> CoopResult<ToolResult> {
        self.invoke_typed(ToolCall::new(name, arguments)).await
    }

    async fn invoke_typed(&self, call: ToolCall) -> CoopResult<ToolResult> {
        self.initialize().await?;
        let entry = self
            .catalog()
            .await
            .tools
            .get(&call.name)
            .ok_or_else(|| CoopError::UnknownTool(call.name.clone()))?;
        entry.tool.execute(call).await
    }

    /// Invoke a tool on behalf of an agent. Failures become error results
    /// whose text names the failure class.
    pub async fn invoke(&self, call: ToolCall) -> ToolResult {
        let call_id = call.id.clone();
        let name = call.name.clone();
        match self.invoke_typed(call).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool call failed");
                ToolResult::from_error(call_id, &e)
            }
        }
    }

    /// Status of every remote source, in registration order.
    pub async fn statuses(&self) -> Vec<SourceState> {
        self.catalog().await.statuses.clone()
    }

    /// Close every shared session.
    pub async fn close(&self) {
        for pool in &self.pools {
            if let Err(e) = pool.close().await {
                warn!(source = %pool.source(), error = %e, "Failed to close source");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Named(ToolDescriptor);

    #[async_trait]
    impl Tool for Named {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.0
        }

        async fn execute(&self, call: ToolCall) -> CoopResult<ToolResult> {
            Ok(ToolResult::success(call.id, format!("{} ran", self.0.name)))
        }
    }

    fn named(name: &str) -> Arc<dyn Tool> {
        Arc::new(Named(ToolDescriptor::new(name, "", json!({"type": "object"}))))
    }

    #[tokio::test]
    async fn test_local_tools_only() {
        let mut registry = ToolsetRegistry::new();
        registry.register_tool(named("a")).unwrap();
        registry.register_tool(named("b")).unwrap();

        let names: Vec<String> = registry.list_tools().await.unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(registry.call_tool("b", json!({})).await.unwrap().content, "b ran");
        assert!(registry.statuses().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_local_registration_rejected() {
        let mut registry = ToolsetRegistry::new();
        registry.register_tool(named("a")).unwrap();
        let err = registry.register_tool(named("a")).unwrap_err();
        assert!(matches!(err, CoopError::Config(_)));
    }

    #[tokio::test]
    async fn test_registration_after_initialize_is_checked() {
        let mut registry = ToolsetRegistry::new();
        registry.register_tool(named("a")).unwrap();
        registry.initialize().await.unwrap();
        registry.register_tool(named("c")).unwrap();
        assert_eq!(registry.list_tools().await.unwrap().len(), 2);
        assert!(registry.register_tool(named("c")).is_err());
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolsetRegistry::new();
        let err = registry.call_tool("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, CoopError::UnknownTool(_)));

        let result = registry.invoke(ToolCall::new("nope", json!({}))).await;
        assert!(result.is_error);
        assert!(result.content.starts_with("Error (UnknownTool)"));
    }
}
