mod config;

use crate::config::CoopConfig;
use clap::{Parser, Subcommand};
use coop_builtins::{local_tools, ConsultTool};
use coop_core::{LogWriter, ToolCall};
use coop_mcp::McpServer;
use coop_toolset::{SourceStatus, ToolsetRegistry};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "coop", version, about = "Coop: tool invocation and agent delegation")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "coop.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and invoke tools across all sources
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },
    /// Show the availability of every tool source
    Sources,
    /// Delegate a task to the marketing peer agent
    Consult {
        /// The situation
        #[arg(long)]
        context: String,
        /// What the peer should produce
        #[arg(long)]
        goal: String,
    },
    /// Serve the local tools over MCP on stdin/stdout
    ServeTools {
        /// Also serve consult_marketing_expert
        #[arg(long)]
        consult: bool,
    },
}

#[derive(Subcommand)]
enum ToolsAction {
    /// List available tools
    List,
    /// Call one tool
    Call {
        /// Tool name
        name: String,
        /// JSON arguments
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = CoopConfig::load(&cli.config)?;
    config.apply_env()?;
    if matches!(cli.command, Commands::ServeTools { .. }) {
        config.logging.writer = LogWriter::Stderr;
    }
    coop_core::logging::init(&config.logging)?;

    match cli.command {
        Commands::Tools { action } => {
            let registry = config.registry()?;
            let code = match action {
                ToolsAction::List => list_tools(&registry).await?,
                ToolsAction::Call { name, args } => call_tool(&registry, name, &args).await?,
            };
            registry.close().await;
            Ok(code)
        }
        Commands::Sources => {
            let registry = config.registry()?;
            for state in registry.statuses().await {
                match state.status {
                    SourceStatus::Ready { tools } => println!("{}\tready\t{tools} tools", state.source),
                    SourceStatus::Unavailable { reason } => {
                        println!("{}\tunavailable\t{reason}", state.source);
                    }
                }
            }
            registry.close().await;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Consult { context, goal } => {
            let reply = config.delegator()?.consult(&context, &goal).await;
            println!("{reply}");
            Ok(exit_for(reply.starts_with("Error")))
        }
        Commands::ServeTools { consult } => {
            let mut server = McpServer::new("coop-local-tools", env!("CARGO_PKG_VERSION"));
            for tool in local_tools() {
                server = server.with_tool(tool)?;
            }
            if consult {
                server = server.with_tool(Arc::new(ConsultTool::new(Arc::new(config.delegator()?))))?;
            }
            info!(tools = server.descriptors().len(), "Serving local tools on stdio");
            Arc::new(server).serve_stdio().await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn list_tools(registry: &ToolsetRegistry) -> anyhow::Result<ExitCode> {
    let tools = registry.list_tools().await?;
    for tool in &tools {
        let summary = tool.description.lines().next().unwrap_or_default();
        println!("{}\t{summary}", tool.name);
    }
    for state in registry.statuses().await {
        if let SourceStatus::Unavailable { reason } = state.status {
            eprintln!("warning: source '{}' unavailable: {reason}", state.source);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn call_tool(registry: &ToolsetRegistry, name: String, args: &str) -> anyhow::Result<ExitCode> {
    let arguments: serde_json::Value = serde_json::from_str(args)
        .map_err(|e| anyhow::anyhow!("--args must be a JSON object: {e}"))?;
    if !arguments.is_object() {
        anyhow::bail!("--args must be a JSON object");
    }
    // Surface collisions before invoking anything.
    registry.initialize().await?;
    let result = registry.invoke(ToolCall::new(name, arguments)).await;
    println!("{}", result.content);
    Ok(exit_for(result.is_error))
}

fn exit_for(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
