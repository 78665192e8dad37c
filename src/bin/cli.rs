//! CLI for the interface server

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use shardkv::common::encode_key;

#[derive(Parser)]
#[command(name = "shardkv")]
#[command(about = "shardkv sharded key-value CLI")]
#[command(version)]
struct Cli {
    /// Interface server URL
    #[arg(long, default_value = "http://localhost:8888")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set one or more keys: KEY VALUE [KEY VALUE ...]
    Set {
        #[arg(required = true, num_args = 2..)]
        pairs: Vec<String>,
    },

    /// Get a key
    Get {
        key: String,
    },

    /// List primaries and standbys
    Clients,

    /// Register a primary
    AddPrimary {
        address: String,
    },

    /// Register a standby for an existing primary
    AddStandby {
        address: String,

        /// Primary the standby replicates
        #[arg(long)]
        primary: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.server.trim_end_matches('/');

    let response = match cli.command {
        Commands::Set { pairs } => {
            if pairs.len() % 2 != 0 {
                bail!("set expects KEY VALUE pairs, got {} arguments", pairs.len());
            }
            let data: Vec<Value> = pairs
                .chunks(2)
                .map(|kv| json!({ "key": kv[0], "value": kv[1] }))
                .collect();
            client
                .post(format!("{}/hash/data", base))
                .json(&json!({ "data": data }))
                .send()
                .await
        }
        Commands::Get { key } => {
            client
                .get(format!("{}/hash/data/{}", base, encode_key(&key)))
                .send()
                .await
        }
        Commands::Clients => client.get(format!("{}/clients", base)).send().await,
        Commands::AddPrimary { address } => {
            client
                .post(format!("{}/clients", base))
                .json(&json!({ "role": "primary", "address": address }))
                .send()
                .await
        }
        Commands::AddStandby { address, primary } => {
            client
                .post(format!("{}/clients", base))
                .json(&json!({
                    "role": "standby",
                    "address": address,
                    "primary_address": primary,
                }))
                .send()
                .await
        }
    }
    .with_context(|| format!("request to {} failed", base))?;

    let status = response.status();
    let body: Value = response.json().await.context("invalid JSON response")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        bail!("server answered {}", status);
    }
    Ok(())
}
