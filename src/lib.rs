//! # shardkv
//!
//! A sharded key-value front-end over plain single-node stores with:
//! - CRC16 hash slots (16384) split evenly across primaries
//! - One standby per primary, kept in sync by write forwarding
//! - Quorum liveness voting between a local ping and monitor servers
//! - Automatic standby promotion, or slot redistribution when a whole
//!   primary/standby pair is lost
//! - Per-node modification logs replayed to migrate data
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            clients
//!               │ HTTP
//! ┌─────────────▼──────────────┐        ┌───────────────┐
//! │      Interface server      │  HTTP  │ Monitor 1..N  │
//! │  hash ring · registry      ├───────►│ (own pings)   │
//! │  failover · modlog         │        └───────┬───────┘
//! └──────┬──────────────┬──────┘                │
//!        │ RESP         │ RESP                  │ RESP
//! ┌──────▼─────┐  ┌─────▼──────┐                │
//! │ Primary A  │  │ Primary B  │◄───────────────┘
//! │ Standby A' │  │ Standby B' │
//! └────────────┘  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start monitors
//! ```bash
//! shardkv-monitor serve --bind 0.0.0.0:8001
//! ```
//!
//! ### Start the interface server
//! ```bash
//! shardkv-interface serve \
//!   --bind 0.0.0.0:8888 \
//!   --primaries 10.0.0.1:6379,10.0.0.2:6379 \
//!   --standbys 10.0.0.3:6379,10.0.0.4:6379 \
//!   --monitors 10.0.1.1:8001,10.0.1.2:8001
//! ```
//!
//! ### Use the CLI
//! ```bash
//! shardkv set foo bar hello world
//! shardkv get foo
//! shardkv clients
//! ```

pub mod common;
pub mod coordinator;
pub mod monitor;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{Cluster, InterfaceServer};
pub use monitor::MonitorServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
