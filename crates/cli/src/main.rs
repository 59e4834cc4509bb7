mod memory_commands;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "mnemo", about = "mnemo — persistent markdown memory over MCP")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP on stdio (default when no subcommand is provided).
    Serve,
    /// Create the base state (main.md + files_index.json) if absent.
    Init,
    /// Reconcile every file into the index and wait for the backlog.
    Sync,
    /// Search memory.
    Search {
        /// The search query.
        query: String,
        /// Maximum number of results to return.
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// Search mode: vector, fulltext or hybrid.
        #[arg(long, default_value = "hybrid")]
        mode: String,
        /// Output results as JSON for scripting.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show memory status (files, chunks, sync states).
    Status {
        /// Output as JSON for scripting.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Logs go to stderr: stdout is the MCP transport.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve().await,
        Commands::Init => memory_commands::init().await,
        Commands::Sync => memory_commands::sync().await,
        Commands::Search {
            query,
            limit,
            mode,
            json,
        } => memory_commands::search(&query, limit, &mode, json).await,
        Commands::Status { json } => memory_commands::status(json).await,
    }
}

async fn serve() -> anyhow::Result<()> {
    let (manager, shutdown) = memory_commands::build_manager().await?;

    let mut registry = mnemo_mcp::ToolRegistry::new();
    mnemo_memory::tools::register_tools(&mut registry, std::sync::Arc::clone(&manager));
    let resources = std::sync::Arc::new(mnemo_memory::tools::MemoryResources::new(manager));
    let server = mnemo_mcp::McpServer::new("mnemo", env!("CARGO_PKG_VERSION"), registry)
        .with_resources(resources);

    info!("serving MCP on stdio");
    server.run(tokio::io::stdin(), tokio::io::stdout()).await?;
    shutdown.cancel();
    Ok(())
}
