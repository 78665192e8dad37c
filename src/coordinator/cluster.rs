//! The cluster object: shared state plus the request path
//!
//! `ClusterState` owns every table the coordination components mutate and
//! is handed to each of them by `Arc`. `Cluster` wires the components
//! together and is what the HTTP layer and the binaries talk to.

use crate::common::{
    slot_index, validate_token, Error, HashRing, InterfaceConfig, NodeRole, Result, SlotRange,
};
use crate::coordinator::failover::{start_monitor_loop, FailoverCoordinator, MonitorLoop};
use crate::coordinator::liveness::{HttpMonitorProbe, LivenessOracle};
use crate::coordinator::modlog::ModificationLog;
use crate::coordinator::node_client::{Command, Connector, RespConnector};
use crate::coordinator::redistribute::SlotRedistributor;
use crate::coordinator::registry::{NodeRef, NodeRegistry};
use crate::coordinator::replication::ReplicationForwarder;
use crate::coordinator::restart::{CommandRestarter, NoopRestarter, Restarter};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Re-routing attempts when the owner of a slot is retired mid-lookup
const MAX_ROUTE_ATTEMPTS: usize = 3;

/// Mutable cluster tables shared by all components
pub struct ClusterState {
    pub registry: NodeRegistry,
    pub ring: RwLock<HashRing<NodeRef>>,
    pub modlog: Arc<ModificationLog>,
    pub oracle: LivenessOracle,
}

/// One command applied on behalf of a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub node_address: String,
    pub slot: u16,
    pub command: String,
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub address: String,
    pub role: NodeRole,
    pub ranges: Vec<SlotRange>,
    /// Standby of a primary, or primary of a standby
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paired_with: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterSnapshot {
    pub primaries: Vec<NodeView>,
    pub standbys: Vec<NodeView>,
}

pub struct Cluster {
    state: Arc<ClusterState>,
    forwarder: ReplicationForwarder,
    failover: Arc<FailoverCoordinator>,
}

impl Cluster {
    pub fn new(
        connector: Arc<dyn Connector>,
        modlog: Arc<ModificationLog>,
        oracle: LivenessOracle,
        restarter: Arc<dyn Restarter>,
    ) -> Self {
        let state = Arc::new(ClusterState {
            registry: NodeRegistry::new(connector, modlog.clone()),
            ring: RwLock::new(HashRing::new()),
            modlog,
            oracle,
        });
        let forwarder = ReplicationForwarder::new(state.clone());
        let redistributor = SlotRedistributor::new(state.clone(), forwarder.clone());
        let failover = Arc::new(FailoverCoordinator::new(
            state.clone(),
            redistributor,
            restarter,
        ));

        Self {
            state,
            forwarder,
            failover,
        }
    }

    /// Wire the production collaborators described by `config`.
    /// Nodes are not dialed until `bootstrap`.
    pub fn from_config(config: &InterfaceConfig) -> Result<Self> {
        let modlog = Arc::new(ModificationLog::open(&config.log_dir, config.log_sync)?);
        let oracle = LivenessOracle::new(
            config.monitors.clone(),
            Arc::new(HttpMonitorProbe::new()),
            config.monitor_timeout(),
        );
        let restarter: Arc<dyn Restarter> = match &config.restart_command {
            Some(template) => Arc::new(
                CommandRestarter::new(template.clone()).with_timeout(config.restart_timeout()),
            ),
            None => Arc::new(NoopRestarter),
        };

        Ok(Self::new(
            Arc::new(
                RespConnector::new(config.connect_timeout())
                    .with_command_timeout(config.command_timeout()),
            ),
            modlog,
            oracle,
            restarter,
        ))
    }

    pub fn state(&self) -> &Arc<ClusterState> {
        &self.state
    }

    pub fn failover(&self) -> &Arc<FailoverCoordinator> {
        &self.failover
    }

    /// Register the initial primaries, split the key space evenly between
    /// them, then pair standby `i` with primary `i mod N`.
    pub async fn bootstrap(&self, primaries: &[String], standbys: &[String]) -> Result<()> {
        if primaries.is_empty() {
            if standbys.is_empty() {
                return Ok(());
            }
            return Err(Error::InvalidConfig(
                "standbys configured without any primary".into(),
            ));
        }
        if standbys.len() > primaries.len() {
            return Err(Error::InvalidConfig(format!(
                "{} standbys for {} primaries, each primary takes at most one",
                standbys.len(),
                primaries.len()
            )));
        }

        let mut nodes = Vec::with_capacity(primaries.len());
        for address in primaries {
            nodes.push(self.state.registry.add_primary(address).await?);
        }
        self.state.ring.write().assign_initial(&nodes);

        for (i, address) in standbys.iter().enumerate() {
            let target = &primaries[i % primaries.len()];
            self.state.registry.add_standby(address, target).await?;
        }

        tracing::info!(
            primaries = primaries.len(),
            standbys = standbys.len(),
            "Cluster bootstrapped"
        );
        Ok(())
    }

    /// Register a primary at runtime. It owns no slots until a
    /// redistribution hands it some, unless it is the very first one.
    pub async fn add_primary(&self, address: &str) -> Result<NodeRef> {
        let node = self.state.registry.add_primary(address).await?;
        let mut ring = self.state.ring.write();
        if ring.owners().next().is_none() {
            ring.assign_range(&node, SlotRange::full());
            tracing::info!(node = %address, "First primary owns the whole key space");
        }
        Ok(node)
    }

    pub async fn add_standby(&self, address: &str, primary_address: &str) -> Result<NodeRef> {
        self.state
            .registry
            .add_standby(address, primary_address)
            .await
    }

    /// Primary responsible for `slot`, after an on-demand failover check
    /// of the current owner
    pub async fn node_for_slot(&self, slot: u16) -> Result<NodeRef> {
        for _ in 0..MAX_ROUTE_ATTEMPTS {
            let owner = self.lookup(slot)?;
            let Some(lock) = self.state.registry.pair_lock(owner.address()) else {
                // Owner was retired between lookup and lock
                continue;
            };
            let _pair = lock.lock().await;
            self.failover.check_locked(&owner).await?;
            return self.lookup(slot);
        }
        Err(Error::SlotUnassigned(slot))
    }

    fn lookup(&self, slot: u16) -> Result<NodeRef> {
        if self.state.registry.primaries().is_empty() {
            return Err(Error::NoPrimaries);
        }
        self.state
            .ring
            .read()
            .lookup(slot)
            .cloned()
            .ok_or(Error::SlotUnassigned(slot))
    }

    /// SET on the owning primary, logged there and forwarded to its standby
    pub async fn set(&self, key: &str, value: &str) -> Result<CommandResult> {
        validate_token(key)?;
        validate_token(value)?;

        let slot = slot_index(key.as_bytes());
        let node = self.node_for_slot(slot).await?;
        node.exec(Command::Set, key, Some(value)).await?;
        self.state
            .modlog
            .append(node.address(), Command::Set, key, Some(value))?;
        self.forwarder
            .forward(&node, Command::Set, key, Some(value))
            .await;

        tracing::debug!(node = %node.address(), slot, key, "SET applied");
        Ok(CommandResult {
            node_address: node.address().to_string(),
            slot,
            command: Command::Set.to_string(),
            key: key.to_string(),
            value: Some(value.to_string()),
        })
    }

    /// Apply a batch of SETs in order, stopping at the first failure
    pub async fn set_many(&self, pairs: &[(String, String)]) -> Result<Vec<CommandResult>> {
        let mut results = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            results.push(self.set(key, value).await?);
        }
        Ok(results)
    }

    /// GET from the owning primary, `value` is `None` for a missing key
    pub async fn get(&self, key: &str) -> Result<CommandResult> {
        validate_token(key)?;

        let slot = slot_index(key.as_bytes());
        let node = self.node_for_slot(slot).await?;
        let value = node.exec(Command::Get, key, None).await?;

        Ok(CommandResult {
            node_address: node.address().to_string(),
            slot,
            command: Command::Get.to_string(),
            key: key.to_string(),
            value,
        })
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        let ring = self.state.ring.read();
        let registry = &self.state.registry;

        let mut primaries: Vec<NodeView> = registry
            .primaries()
            .iter()
            .map(|n| NodeView {
                address: n.address().to_string(),
                role: NodeRole::Primary,
                ranges: ring.ranges_of(n.address()).to_vec(),
                paired_with: registry
                    .standby_of(n.address())
                    .map(|s| s.address().to_string()),
            })
            .collect();
        let mut standbys: Vec<NodeView> = registry
            .standbys()
            .iter()
            .map(|n| NodeView {
                address: n.address().to_string(),
                role: NodeRole::Standby,
                ranges: Vec::new(),
                paired_with: registry
                    .primary_of(n.address())
                    .map(|p| p.address().to_string()),
            })
            .collect();

        primaries.sort_by(|a, b| a.address.cmp(&b.address));
        standbys.sort_by(|a, b| a.address.cmp(&b.address));
        ClusterSnapshot {
            primaries,
            standbys,
        }
    }

    /// Start the periodic liveness sweep
    pub fn start_monitor(&self, interval: Duration) -> MonitorLoop {
        start_monitor_loop(self.failover.clone(), interval)
    }
}
