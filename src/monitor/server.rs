//! Monitor server

use crate::common::{MonitorConfig, Result};
use crate::coordinator::node_client::RespConnector;
use crate::monitor::http::{create_router, MonitorState};
use crate::monitor::pool::NodePool;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct MonitorServer {
    config: MonitorConfig,
}

impl MonitorServer {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Starting monitor server");
        tracing::info!("  HTTP API: {}", self.config.bind_addr);

        let connector = RespConnector::new(self.config.connect_timeout())
            .with_command_timeout(self.config.command_timeout());
        let pool = Arc::new(NodePool::new(Arc::new(connector)));
        for address in &self.config.nodes {
            // Unreachable nodes are dialed again on their first query
            if let Err(e) = pool.register(address).await {
                tracing::warn!(node = %address, error = %e, "Initial dial failed");
            }
        }

        let router = create_router(MonitorState { pool });
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("✓ Monitor server ready");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;
        Ok(())
    }
}
