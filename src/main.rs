//! PagePilot - asynchronous browser-automation engine.
//!
//! Entry point: loads configuration, wires the browser pool, coordinator
//! and API server together, and runs until interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pagepilot_api::{ApiServer, AppState};
use pagepilot_browser::{BrowserContextPool, CdpContextFactory};
use pagepilot_core::EngineConfig;
use pagepilot_engine::{MemoryTaskStore, TaskCoordinator, WebhookDispatcher};
use pagepilot_executor::PlanExecutor;
use pagepilot_parser::{ResultCache, SemanticParser};

/// PagePilot CLI.
#[derive(Parser)]
#[command(name = "pagepilot")]
#[command(about = "Asynchronous browser-automation engine")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine and API server in the foreground (default)
    Run {
        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate the configuration file and exit
    CheckConfig,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pagepilot=debug"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    if !path.exists() {
        warn!("Config file {} not found, using defaults", path.display());
        return Ok(EngineConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn run(mut config: EngineConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let factory = Arc::new(CdpContextFactory::new(&config.pool));
    let pool = BrowserContextPool::new(config.pool.clone(), factory.clone());
    let sweeper = pool.spawn_sweeper();

    let cache = Arc::new(ResultCache::new());
    let parser = Arc::new(SemanticParser::new(
        config.parser.clone(),
        cache,
        Duration::from_secs(config.cache.ttl_secs),
    ));
    let executor = Arc::new(PlanExecutor::new(config.executor.clone()));
    let webhooks = Arc::new(WebhookDispatcher::new(config.webhook.clone()));

    let coordinator = Arc::new(TaskCoordinator::new(
        config.workers.clone(),
        pool,
        Arc::new(MemoryTaskStore::new()),
        parser,
        executor,
        webhooks,
    ));
    coordinator.start();

    let state = Arc::new(AppState::new(coordinator.clone()));
    let server = ApiServer::new(config.server.clone(), state);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    };
    server
        .run(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("API server failed: {}", e))?;

    sweeper.abort();
    coordinator.shutdown().await;
    factory.shutdown().await;
    info!("Goodbye");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Some(Commands::CheckConfig) => {
            println!("Configuration OK ({} workers, pool size {})",
                config.workers.count, config.pool.max_size);
            Ok(())
        }
        Some(Commands::Run { host, port }) => run(config, host, port).await,
        None => run(config, None, None).await,
    }
}
