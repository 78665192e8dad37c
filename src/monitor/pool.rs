//! Connections held by a monitor server

use crate::common::Result;
use crate::coordinator::liveness::MonitorResponse;
use crate::coordinator::node_client::{Connector, NodeClient};
use std::collections::HashMap;
use std::sync::Arc;

pub struct NodePool {
    connector: Arc<dyn Connector>,
    nodes: tokio::sync::Mutex<HashMap<String, Arc<dyn NodeClient>>>,
}

impl NodePool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            nodes: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Dial `address` and keep the connection
    pub async fn register(&self, address: &str) -> Result<()> {
        let client = self.connector.connect(address).await?;
        self.nodes.lock().await.insert(address.to_string(), client);
        tracing::info!(node = %address, "Node registered with monitor");
        Ok(())
    }

    pub async fn unregister(&self, address: &str) -> bool {
        self.nodes.lock().await.remove(address).is_some()
    }

    pub async fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.nodes.lock().await.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Ping `address`, dialing it first if it is unknown.
    /// An unreachable node is reported dead, never as an error.
    pub async fn check(&self, address: &str) -> MonitorResponse {
        let known = self.nodes.lock().await.get(address).cloned();
        let client = match known {
            Some(client) => Some(client),
            None => match self.connector.connect(address).await {
                Ok(client) => {
                    self.nodes
                        .lock()
                        .await
                        .insert(address.to_string(), client.clone());
                    Some(client)
                }
                Err(e) => {
                    tracing::debug!(node = %address, error = %e, "Dial failed");
                    None
                }
            },
        };

        let is_alive = match client {
            Some(client) => match client.ping().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(node = %address, error = %e, "Ping failed");
                    false
                }
            },
            None => false,
        };

        MonitorResponse {
            redis_node_address: address.to_string(),
            is_alive,
            error_message: String::new(),
        }
    }
}
