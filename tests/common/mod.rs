//! In-memory cluster harness shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use shardkv::common::LogSyncPolicy;
use shardkv::coordinator::{
    Cluster, LivenessOracle, MemoryConnector, ModificationLog, MonitorProbe, MonitorResponse,
    Restarter,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Monitors that see exactly what the in-memory nodes see
pub struct ConnectorProbe {
    connector: Arc<MemoryConnector>,
}

#[async_trait]
impl MonitorProbe for ConnectorProbe {
    async fn query(&self, _monitor: &str, node_address: &str) -> shardkv::Result<MonitorResponse> {
        Ok(MonitorResponse {
            redis_node_address: node_address.to_string(),
            is_alive: self.connector.is_up(node_address),
            error_message: String::new(),
        })
    }
}

/// Records every restart request, optionally never finishing one
#[derive(Default)]
pub struct RecordingRestarter {
    pub restarted: Mutex<Vec<String>>,
    hang: AtomicBool,
}

impl RecordingRestarter {
    /// Make every later restart block forever
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Restarter for RecordingRestarter {
    async fn restart_at(&self, address: &str) -> shardkv::Result<()> {
        self.restarted.lock().push(address.to_string());
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

pub struct Harness {
    pub connector: Arc<MemoryConnector>,
    pub restarter: Arc<RecordingRestarter>,
    pub modlog: Arc<ModificationLog>,
    pub cluster: Arc<Cluster>,
    pub dir: TempDir,
}

/// Bootstrap a cluster of in-memory nodes watched by two monitors
pub async fn harness(primaries: &[&str], standbys: &[&str]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let connector = Arc::new(MemoryConnector::new());
    let restarter = Arc::new(RecordingRestarter::default());
    let modlog = Arc::new(ModificationLog::open(dir.path(), LogSyncPolicy::Flush).unwrap());
    let oracle = LivenessOracle::new(
        vec!["monitor-1".into(), "monitor-2".into()],
        Arc::new(ConnectorProbe {
            connector: connector.clone(),
        }),
        Some(Duration::from_secs(1)),
    );

    let cluster = Cluster::new(connector.clone(), modlog.clone(), oracle, restarter.clone());
    let primaries: Vec<String> = primaries.iter().map(|s| s.to_string()).collect();
    let standbys: Vec<String> = standbys.iter().map(|s| s.to_string()).collect();
    cluster.bootstrap(&primaries, &standbys).await.unwrap();

    Harness {
        connector,
        restarter,
        modlog,
        cluster: Arc::new(cluster),
        dir,
    }
}

impl Harness {
    pub fn node(&self, address: &str) -> shardkv::coordinator::NodeRef {
        self.cluster
            .state()
            .registry
            .get_by_address(address)
            .unwrap()
    }

    pub fn slot_count(&self, address: &str) -> usize {
        self.cluster.state().ring.read().slot_count_of(address)
    }

    /// Restarts run detached; wait until `count` of them were requested
    pub async fn restarts(&self, count: usize) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let restarted = self.restarter.restarted.lock().clone();
            if restarted.len() >= count || tokio::time::Instant::now() >= deadline {
                return restarted;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Every slot is owned by a registered primary
    pub fn assert_slots_on_primaries(&self) {
        let state = self.cluster.state();
        let ring = state.ring.read();
        for slot in 0..shardkv::common::SLOT_COUNT as u16 {
            let owner = ring.lookup(slot).unwrap();
            assert!(owner.is_primary(), "slot {} routes to standby {}", slot, owner.address());
            assert!(state.registry.is_registered(owner.address()));
        }
    }
}
