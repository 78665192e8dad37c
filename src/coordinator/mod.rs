//! Cluster coordination
//!
//! The coordinator is responsible for:
//! - Routing keys to the primary owning their hash slot
//! - Primary/standby membership and pairing
//! - Quorum liveness voting against the monitor servers
//! - Promoting standbys and redistributing the slots of dead pairs
//! - Per-node modification logs used for replication and migration

pub mod cluster;
pub mod failover;
pub mod http;
pub mod liveness;
pub mod modlog;
pub mod node_client;
pub mod redistribute;
pub mod registry;
pub mod replication;
pub mod restart;
pub mod server;

pub use cluster::{Cluster, ClusterSnapshot, ClusterState, CommandResult};
pub use failover::{start_monitor_loop, FailoverCoordinator, FailoverOutcome, MonitorLoop};
pub use liveness::{HttpMonitorProbe, LivenessOracle, MonitorProbe, MonitorResponse, VoteResult};
pub use modlog::{LogEntry, ModificationLog};
pub use node_client::{Command, Connector, MemoryConnector, NodeClient, RespConnector};
pub use redistribute::{RedistributionReport, SlotRedistributor};
pub use registry::{Node, NodeRef, NodeRegistry};
pub use replication::ReplicationForwarder;
pub use restart::{CommandRestarter, NoopRestarter, Restarter};
pub use server::InterfaceServer;
