//! Monitor server binary

use clap::{Parser, Subcommand};
use shardkv::{common::Config, MonitorServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardkv-monitor")]
#[command(about = "shardkv liveness monitor")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the monitor server
    Serve {
        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// Nodes to dial at startup (comma-separated host:port)
        #[arg(long, value_delimiter = ',')]
        nodes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve { bind, nodes } => {
            let mut monitor = config.monitor;
            if let Some(bind) = bind {
                monitor.bind_addr = bind.parse()?;
            }
            if !nodes.is_empty() {
                monitor.nodes = nodes;
            }

            MonitorServer::new(monitor)
                .serve(async {
                    let _ = tokio::signal::ctrl_c().await;
                    tracing::info!("Shutdown signal received");
                })
                .await?;
        }
    }

    Ok(())
}
