//! Common utilities and types shared across shardkv

pub mod config;
pub mod error;
pub mod hash;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, InterfaceConfig, LogSyncPolicy, MonitorConfig};
pub use error::{Error, Result};
pub use hash::{slot_index, HashRing, SlotOwner, SlotRange, SLOT_COUNT};
pub use utils::{
    decode_address, encode_address, encode_key, timestamp_now, validate_token, NodeRole,
};
