use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use taskhub::cep::family_tree::CepFamilyTree;
use taskhub::cep::match_index::MatchIndex;
use taskhub::cep::registry::CepRegistry;
use taskhub::config::HubConfig;
use taskhub::fsm::bridge::FsmBridge;
use taskhub::runtime::context::HubContext;
use taskhub::runtime::dispatcher::Dispatcher;
use taskhub::runtime::error_task::TaskCatalog;
use taskhub::runtime::redis_storage::RedisTaskStore;
use taskhub::runtime::storage::{InMemoryTaskStore, TaskStore};
use taskhub::runtime::timers::TimerRegistry;
use taskhub::runtime::transport::{ChannelTransport, Transport};
use taskhub::sync::SyncProtocol;

use anyhow::Result;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub with in-memory storage (Standalone Mode)
    Run {
        /// Path to the hub YAML config
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Run the hub against Redis-backed task storage
    Worker {
        /// Redis connection URL
        #[arg(long, default_value = "redis://127.0.0.1:6379/0")]
        redis: String,

        /// Path to the hub YAML config
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<HubConfig> {
    match path {
        Some(p) => HubConfig::load(&p),
        None => Ok(HubConfig::default()),
    }
}

async fn run_hub(config: HubConfig, store: Arc<dyn TaskStore>) -> Result<()> {
    let catalog = Arc::new(TaskCatalog::new());
    for id in &config.task_ids {
        catalog.insert(id.clone());
    }

    let (transport, mut incoming) = ChannelTransport::new(config.channel_capacity());
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let sync = Arc::new(match config.http_timeout() {
        Some(timeout) => SyncProtocol::with_http_timeout(transport, catalog.clone(), timeout)?,
        None => SyncProtocol::new(transport, catalog.clone()),
    });

    let registry = Arc::new(CepRegistry::new());
    registry.register("familyTree", Arc::new(CepFamilyTree));

    let ctx = HubContext {
        store,
        locks: Arc::new(config.lock_manager()),
        timers: Arc::new(TimerRegistry::new()),
        registry,
        match_index: Arc::new(MatchIndex::new()),
        sync,
        fsm: Arc::new(FsmBridge::new()),
        catalog,
    };
    let dispatcher = Dispatcher::new(ctx.clone());

    info!("Hub started.");
    // Standalone loop: everything the sync protocol emits comes straight
    // back into the dispatcher, as if a local processor owned every instance.
    while let Some(message) = incoming.recv().await {
        if let Err(e) = dispatcher.dispatch_message(message).await {
            tracing::error!(error = %e, "dispatch failed");
        }
    }
    ctx.timers.cancel_all();
    info!("Hub stopped.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            info!("Running in Standalone Memory Mode");
            let config = load_config(config)?;
            run_hub(config, Arc::new(InMemoryTaskStore::new())).await?;
        }
        Commands::Worker { redis, config } => {
            info!("Starting hub against Redis: {}", redis);
            let config = load_config(config)?;
            let client = redis::Client::open(redis)?;
            let store = Arc::new(RedisTaskStore::new(client, "taskhub:active".to_string()));
            run_hub(config, store).await?;
        }
    }
    Ok(())
}
