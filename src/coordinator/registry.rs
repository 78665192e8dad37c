//! Node registry: primaries, standbys, the pairing between them and the
//! lock each pair shares.

use crate::common::{Error, NodeRole, Result, SlotOwner};
use crate::coordinator::modlog::ModificationLog;
use crate::coordinator::node_client::{Command, Connector, NodeClient};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Lock shared by a primary and its standby.
/// Held across awaits for a whole failover decision.
pub type PairLock = Arc<tokio::sync::Mutex<()>>;

/// A registered backing node
pub struct Node {
    address: String,
    role: RwLock<NodeRole>,
    client: Arc<dyn NodeClient>,
}

pub type NodeRef = Arc<Node>;

impl Node {
    pub fn new(address: &str, role: NodeRole, client: Arc<dyn NodeClient>) -> Self {
        Self {
            address: address.to_string(),
            role: RwLock::new(role),
            client,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn role(&self) -> NodeRole {
        *self.role.read()
    }

    pub fn is_primary(&self) -> bool {
        self.role() == NodeRole::Primary
    }

    pub async fn ping(&self) -> Result<()> {
        self.client.ping().await
    }

    pub async fn exec(
        &self,
        command: Command,
        key: &str,
        value: Option<&str>,
    ) -> Result<Option<String>> {
        self.client.exec(command, key, value).await
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("role", &self.role())
            .finish()
    }
}

impl SlotOwner for NodeRef {
    fn address(&self) -> &str {
        &self.address
    }
}

#[derive(Default)]
struct Membership {
    primaries: Vec<NodeRef>,
    standbys: Vec<NodeRef>,
    /// primary address -> standby
    standby_of: HashMap<String, NodeRef>,
    /// standby address -> primary
    primary_of: HashMap<String, NodeRef>,
    locks: HashMap<String, PairLock>,
}

impl Membership {
    fn contains(&self, address: &str) -> bool {
        self.primaries
            .iter()
            .chain(self.standbys.iter())
            .any(|n| n.address() == address)
    }
}

/// Swap-with-last removal, order among peers carries no meaning
fn remove_node(list: &mut Vec<NodeRef>, address: &str) -> Option<NodeRef> {
    let idx = list.iter().position(|n| n.address() == address)?;
    Some(list.swap_remove(idx))
}

/// Authoritative membership tables
pub struct NodeRegistry {
    members: RwLock<Membership>,
    connector: Arc<dyn Connector>,
    modlog: Arc<ModificationLog>,
}

impl NodeRegistry {
    pub fn new(connector: Arc<dyn Connector>, modlog: Arc<ModificationLog>) -> Self {
        Self {
            members: RwLock::new(Membership::default()),
            connector,
            modlog,
        }
    }

    /// Dial `address` and register it as a primary
    pub async fn add_primary(&self, address: &str) -> Result<NodeRef> {
        if self.members.read().contains(address) {
            return Err(Error::AlreadyRegistered(address.to_string()));
        }

        let client = self.connector.connect(address).await?;
        self.modlog.init(address)?;
        let node = Arc::new(Node::new(address, NodeRole::Primary, client));

        let mut members = self.members.write();
        if members.contains(address) {
            return Err(Error::AlreadyRegistered(address.to_string()));
        }
        members.primaries.push(node.clone());
        members
            .locks
            .insert(address.to_string(), Arc::new(tokio::sync::Mutex::new(())));

        tracing::info!(node = %address, "Primary registered");
        Ok(node)
    }

    /// Dial `address` and register it as the standby of `primary_address`
    pub async fn add_standby(&self, address: &str, primary_address: &str) -> Result<NodeRef> {
        self.check_standby_target(address, primary_address)?;

        let client = self.connector.connect(address).await?;
        self.modlog.init(address)?;
        let node = Arc::new(Node::new(address, NodeRole::Standby, client));

        let mut members = self.members.write();
        self.check_target_locked(&members, address, primary_address)?;
        let primary = members
            .primaries
            .iter()
            .find(|n| n.address() == primary_address)
            .cloned()
            .ok_or_else(|| Error::UnknownPrimary(primary_address.to_string()))?;
        let lock = members
            .locks
            .get(primary_address)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no pair lock for {}", primary_address)))?;

        members.standbys.push(node.clone());
        members
            .standby_of
            .insert(primary_address.to_string(), node.clone());
        members.primary_of.insert(address.to_string(), primary);
        members.locks.insert(address.to_string(), lock);

        tracing::info!(node = %address, primary = %primary_address, "Standby registered");
        Ok(node)
    }

    fn check_standby_target(&self, address: &str, primary_address: &str) -> Result<()> {
        let members = self.members.read();
        self.check_target_locked(&members, address, primary_address)
    }

    fn check_target_locked(
        &self,
        members: &Membership,
        address: &str,
        primary_address: &str,
    ) -> Result<()> {
        if members.contains(address) {
            return Err(Error::AlreadyRegistered(address.to_string()));
        }
        if !members.primaries.iter().any(|n| n.address() == primary_address) {
            return Err(Error::UnknownPrimary(primary_address.to_string()));
        }
        if let Some(existing) = members.standby_of.get(primary_address) {
            return Err(Error::InvalidConfig(format!(
                "primary {} already has standby {}",
                primary_address,
                existing.address()
            )));
        }
        Ok(())
    }

    /// Find a node by address among primaries and standbys
    pub fn get_by_address(&self, address: &str) -> Result<NodeRef> {
        let members = self.members.read();
        if members.primaries.is_empty() && members.standbys.is_empty() {
            return Err(Error::NoPrimaries);
        }
        members
            .primaries
            .iter()
            .chain(members.standbys.iter())
            .find(|n| n.address() == address)
            .cloned()
            .ok_or_else(|| Error::NotFound(address.to_string()))
    }

    pub fn is_registered(&self, address: &str) -> bool {
        self.members.read().contains(address)
    }

    pub fn primaries(&self) -> Vec<NodeRef> {
        self.members.read().primaries.clone()
    }

    pub fn standbys(&self) -> Vec<NodeRef> {
        self.members.read().standbys.clone()
    }

    pub fn standby_of(&self, primary_address: &str) -> Option<NodeRef> {
        self.members.read().standby_of.get(primary_address).cloned()
    }

    pub fn primary_of(&self, standby_address: &str) -> Option<NodeRef> {
        self.members.read().primary_of.get(standby_address).cloned()
    }

    pub fn pair_lock(&self, address: &str) -> Option<PairLock> {
        self.members.read().locks.get(address).cloned()
    }

    /// Promote `standby` and demote `primary` in one critical section.
    ///
    /// The caller holds the pair lock. Nothing is modified unless
    /// `standby` is currently the standby of `primary`.
    pub fn swap_roles(&self, primary: &NodeRef, standby: &NodeRef) -> Result<()> {
        let mut members = self.members.write();

        let paired = members
            .standby_of
            .get(primary.address())
            .map(|s| s.address() == standby.address())
            .unwrap_or(false);
        if !paired {
            return Err(Error::StandbyNotAssigned(primary.address().to_string()));
        }

        let old_primary = remove_node(&mut members.primaries, primary.address())
            .ok_or_else(|| Error::NotFound(primary.address().to_string()))?;
        let Some(new_primary) = remove_node(&mut members.standbys, standby.address()) else {
            members.primaries.push(old_primary);
            return Err(Error::NotFound(standby.address().to_string()));
        };

        *old_primary.role.write() = NodeRole::Standby;
        *new_primary.role.write() = NodeRole::Primary;

        members.standby_of.remove(old_primary.address());
        members.primary_of.remove(new_primary.address());
        members
            .standby_of
            .insert(new_primary.address().to_string(), old_primary.clone());
        members
            .primary_of
            .insert(old_primary.address().to_string(), new_primary.clone());

        members.primaries.push(new_primary);
        members.standbys.push(old_primary);

        tracing::info!(
            new_primary = %standby.address(),
            new_standby = %primary.address(),
            "Roles swapped"
        );
        Ok(())
    }

    /// Retire a primary and, if it has one, its standby
    pub fn remove_pair(&self, primary: &NodeRef, standby: Option<&NodeRef>) -> Result<()> {
        let mut members = self.members.write();

        remove_node(&mut members.primaries, primary.address())
            .ok_or_else(|| Error::NotFound(primary.address().to_string()))?;
        members.standby_of.remove(primary.address());
        members.locks.remove(primary.address());

        if let Some(standby) = standby {
            remove_node(&mut members.standbys, standby.address());
            members.primary_of.remove(standby.address());
            members.locks.remove(standby.address());
        }

        tracing::info!(
            primary = %primary.address(),
            standby = standby.map(|s| s.address()).unwrap_or("-"),
            "Pair retired"
        );
        Ok(())
    }
}
