//! Interface server

use crate::common::{InterfaceConfig, Result};
use crate::coordinator::cluster::Cluster;
use crate::coordinator::http::{create_router, InterfaceState};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct InterfaceServer {
    config: InterfaceConfig,
}

impl InterfaceServer {
    pub fn new(config: InterfaceConfig) -> Self {
        Self { config }
    }

    /// Bootstrap the cluster, start the liveness sweep and serve HTTP
    /// until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Starting interface server");
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Modification logs: {}", self.config.log_dir.display());
        tracing::info!("  Monitors: {:?}", self.config.monitors);
        tracing::info!("  Tick interval: {:?}", self.config.tick_interval());

        let cluster = Arc::new(Cluster::from_config(&self.config)?);
        cluster
            .bootstrap(&self.config.primaries, &self.config.standbys)
            .await?;

        let monitor_loop = cluster.start_monitor(self.config.tick_interval());

        let router = create_router(InterfaceState {
            cluster: cluster.clone(),
        });
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("✓ Interface server ready");

        let served = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        if let Some(e) = monitor_loop.stop().await {
            tracing::warn!(error = %e, "Monitor loop had stopped with an error");
        }
        served?;
        Ok(())
    }
}
