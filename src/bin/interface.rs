//! Interface server binary

use clap::{Parser, Subcommand};
use shardkv::{common::Config, InterfaceServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardkv-interface")]
#[command(about = "shardkv interface server with quorum failover")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interface server
    Serve {
        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// Initial primaries (comma-separated host:port)
        #[arg(long, value_delimiter = ',')]
        primaries: Vec<String>,

        /// Initial standbys, paired round-robin with the primaries
        #[arg(long, value_delimiter = ',')]
        standbys: Vec<String>,

        /// Monitor servers (comma-separated host:port)
        #[arg(long, value_delimiter = ',')]
        monitors: Vec<String>,

        /// Modification log directory
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Liveness sweep interval in milliseconds
        #[arg(long)]
        tick_ms: Option<u64>,

        /// Restart command, `{address}` is replaced by the node address
        #[arg(long)]
        restart_command: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // Load config from file and environment, then override with CLI arguments
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            bind,
            primaries,
            standbys,
            monitors,
            log_dir,
            tick_ms,
            restart_command,
        } => {
            let mut interface = config.interface;
            if let Some(bind) = bind {
                interface.bind_addr = bind.parse()?;
            }
            if !primaries.is_empty() {
                interface.primaries = primaries;
            }
            if !standbys.is_empty() {
                interface.standbys = standbys;
            }
            if !monitors.is_empty() {
                interface.monitors = monitors;
            }
            if let Some(dir) = log_dir {
                interface.log_dir = dir;
            }
            if let Some(ms) = tick_ms {
                interface.tick_interval_ms = ms;
            }
            if restart_command.is_some() {
                interface.restart_command = restart_command;
            }
            interface.validate()?;

            InterfaceServer::new(interface).serve(shutdown_signal()).await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
