//! Best-effort write forwarding from a primary to its standby

use crate::coordinator::cluster::ClusterState;
use crate::coordinator::node_client::Command;
use crate::coordinator::registry::Node;
use std::sync::Arc;

#[derive(Clone)]
pub struct ReplicationForwarder {
    state: Arc<ClusterState>,
}

impl ReplicationForwarder {
    pub fn new(state: Arc<ClusterState>) -> Self {
        Self { state }
    }

    /// Mirror a write applied on `primary` to its standby.
    ///
    /// Never fails: a missing, dead or failing standby only produces a log
    /// line. The standby's modification log records the write even when
    /// the standby itself rejected it.
    pub async fn forward(&self, primary: &Node, command: Command, key: &str, value: Option<&str>) {
        let Some(standby) = self.state.registry.standby_of(primary.address()) else {
            tracing::debug!(primary = %primary.address(), "No standby to replicate to");
            return;
        };

        match self.state.oracle.ask_alive(&standby).await {
            Ok(vote) if vote.is_alive() => {}
            Ok(vote) => {
                tracing::debug!(standby = %standby.address(), %vote, "Standby is down, skipping replication");
                return;
            }
            Err(e) => {
                tracing::warn!(standby = %standby.address(), error = %e, "Standby liveness unknown, skipping replication");
                return;
            }
        }

        if let Err(e) = standby.exec(command, key, value).await {
            tracing::warn!(standby = %standby.address(), key, error = %e, "Replication write failed");
        }
        if let Err(e) = self.state.modlog.append(standby.address(), command, key, value) {
            tracing::warn!(standby = %standby.address(), key, error = %e, "Replication log append failed");
        }
    }
}
