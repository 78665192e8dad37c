//! Configuration for shardkv components
//!
//! Values are layered: built-in defaults, then an optional TOML file
//! (`shardkv.toml` or the path in `SHARDKV_CONFIG`), then environment
//! variables such as `SHARDKV__INTERFACE__BIND_ADDR`. Binaries apply their
//! command-line flags on top of the loaded result.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "shardkv.toml";

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Interface server (client-facing, runs the coordination core)
    #[serde(default)]
    pub interface: InterfaceConfig,

    /// Monitor server (liveness oracle)
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("SHARDKV_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(
                config::Environment::with_prefix("SHARDKV")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("interface.primaries")
                    .with_list_parse_key("interface.standbys")
                    .with_list_parse_key("interface.monitors")
                    .with_list_parse_key("monitor.nodes")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.interface.validate()?;
        Ok(config)
    }
}

/// How hard the modification log pushes each record to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSyncPolicy {
    /// Flush and fsync after every record
    Always,
    /// Flush to the OS after every record
    #[default]
    Flush,
    /// Leave flushing to the buffered writer
    Never,
}

/// Interface server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_interface_bind")]
    pub bind_addr: SocketAddr,

    /// Initial primary addresses
    #[serde(default)]
    pub primaries: Vec<String>,

    /// Initial standby addresses, paired round-robin with the primaries
    #[serde(default)]
    pub standbys: Vec<String>,

    /// Monitor server addresses (host:port)
    #[serde(default)]
    pub monitors: Vec<String>,

    /// Directory holding one modification log per node
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default)]
    pub log_sync: LogSyncPolicy,

    /// Liveness sweep interval
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Dial timeout for backing nodes
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Deadline for one command round trip on a backing node
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Deadline for a single monitor query and the local ping, 0 waits forever
    #[serde(default = "default_monitor_timeout")]
    pub monitor_timeout_ms: u64,

    /// Shell command run to restart a node, `{address}` is substituted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_command: Option<String>,

    /// The restart command is killed after this long
    #[serde(default = "default_restart_timeout")]
    pub restart_timeout_ms: u64,
}

fn default_interface_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8888))
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./data/modlog")
}
fn default_tick_interval() -> u64 {
    1000
}
fn default_connect_timeout() -> u64 {
    5000
}
fn default_command_timeout() -> u64 {
    3000
}
fn default_monitor_timeout() -> u64 {
    3000
}
fn default_restart_timeout() -> u64 {
    60_000
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_interface_bind(),
            primaries: Vec::new(),
            standbys: Vec::new(),
            monitors: Vec::new(),
            log_dir: default_log_dir(),
            log_sync: LogSyncPolicy::default(),
            tick_interval_ms: default_tick_interval(),
            connect_timeout_ms: default_connect_timeout(),
            command_timeout_ms: default_command_timeout(),
            monitor_timeout_ms: default_monitor_timeout(),
            restart_command: None,
            restart_timeout_ms: default_restart_timeout(),
        }
    }
}

impl InterfaceConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn restart_timeout(&self) -> Duration {
        Duration::from_millis(self.restart_timeout_ms)
    }

    /// `None` when monitor queries may block indefinitely
    pub fn monitor_timeout(&self) -> Option<Duration> {
        match self.monitor_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "tick_interval_ms must be positive".into(),
            ));
        }
        if !self.standbys.is_empty() && self.primaries.is_empty() {
            return Err(Error::InvalidConfig(
                "standbys configured without any primary".into(),
            ));
        }
        if self.standbys.len() > self.primaries.len() {
            return Err(Error::InvalidConfig(format!(
                "{} standbys for {} primaries, each primary takes at most one",
                self.standbys.len(),
                self.primaries.len()
            )));
        }
        Ok(())
    }
}

/// Monitor server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Bind address for the monitor HTTP API
    #[serde(default = "default_monitor_bind")]
    pub bind_addr: SocketAddr,

    /// Nodes dialed at startup (others are dialed on first query)
    #[serde(default)]
    pub nodes: Vec<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

fn default_monitor_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8001))
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_monitor_bind(),
            nodes: Vec::new(),
            connect_timeout_ms: default_connect_timeout(),
            command_timeout_ms: default_command_timeout(),
        }
    }
}

impl MonitorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = InterfaceConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.monitor_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(config.command_timeout(), Duration::from_secs(3));
        assert_eq!(config.restart_timeout(), Duration::from_secs(60));
        assert_eq!(config.log_sync, LogSyncPolicy::Flush);
    }

    #[test]
    fn test_zero_monitor_timeout_disables_deadline() {
        let config = InterfaceConfig {
            monitor_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.monitor_timeout(), None);
    }

    #[test]
    fn test_standbys_need_primaries() {
        let config = InterfaceConfig {
            standbys: vec!["10.0.0.9:6379".into()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let raw = r#"
            [interface]
            primaries = ["10.0.0.1:6379", "10.0.0.2:6379"]
            log_sync = "always"
        "#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.interface.primaries.len(), 2);
        assert_eq!(config.interface.log_sync, LogSyncPolicy::Always);
        assert_eq!(config.interface.tick_interval_ms, 1000);
        assert_eq!(config.log_level, "info");
    }
}
