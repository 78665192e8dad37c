//! Failover state machine and the periodic liveness sweep
//!
//! ```text
//! Healthy --(majority dead)--> PrimarySuspect
//! PrimarySuspect --(standby alive)--> swap roles, restart old primary --> Healthy
//! PrimarySuspect --(standby dead or missing)--> PairDead
//! PairDead --> redistribute slots, retire the pair
//! ```
//!
//! Every decision for a pair runs under that pair's lock, so a tick and a
//! request-path check never promote or redistribute the same pair twice.
//! The restart of a demoted primary is detached from the check and never
//! holds the pair lock.

use crate::common::{Error, Result};
use crate::coordinator::cluster::ClusterState;
use crate::coordinator::redistribute::{RedistributionReport, SlotRedistributor};
use crate::coordinator::registry::NodeRef;
use crate::coordinator::restart::Restarter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};

/// Result of checking one primary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverOutcome {
    /// Majority says the primary is alive
    Healthy,
    /// Node was demoted or retired before the check could run
    Skipped,
    /// Standby took over
    Promoted {
        new_primary: String,
        old_primary: String,
    },
    /// The pair is gone, its slots moved to the other primaries
    Retired {
        primary: String,
        report: RedistributionReport,
    },
}

pub struct FailoverCoordinator {
    state: Arc<ClusterState>,
    redistributor: SlotRedistributor,
    restarter: Arc<dyn Restarter>,
}

impl FailoverCoordinator {
    pub fn new(
        state: Arc<ClusterState>,
        redistributor: SlotRedistributor,
        restarter: Arc<dyn Restarter>,
    ) -> Self {
        Self {
            state,
            redistributor,
            restarter,
        }
    }

    pub fn redistributor(&self) -> &SlotRedistributor {
        &self.redistributor
    }

    /// Take the pair lock of `primary` and check it
    pub async fn check_primary(&self, primary: &NodeRef) -> Result<FailoverOutcome> {
        let Some(lock) = self.state.registry.pair_lock(primary.address()) else {
            return Ok(FailoverOutcome::Skipped);
        };
        let _pair = lock.lock().await;
        self.check_locked(primary).await
    }

    /// Check `primary`; the caller holds its pair lock
    pub async fn check_locked(&self, primary: &NodeRef) -> Result<FailoverOutcome> {
        if !primary.is_primary() || !self.state.registry.is_registered(primary.address()) {
            return Ok(FailoverOutcome::Skipped);
        }

        let vote = self.state.oracle.ask_alive(primary).await?;
        if vote.is_alive() {
            return Ok(FailoverOutcome::Healthy);
        }
        tracing::warn!(node = %primary.address(), %vote, "Primary suspected dead");

        let Some(standby) = self.state.registry.standby_of(primary.address()) else {
            tracing::warn!(node = %primary.address(), "Primary has no standby, retiring it");
            return self.retire(primary, None).await;
        };

        let standby_vote = self.state.oracle.ask_alive(&standby).await?;
        if standby_vote.is_alive() {
            self.promote(primary, &standby).await
        } else {
            tracing::warn!(
                primary = %primary.address(),
                standby = %standby.address(),
                vote = %standby_vote,
                "Standby is dead too"
            );
            self.retire(primary, Some(&standby)).await
        }
    }

    async fn promote(&self, primary: &NodeRef, standby: &NodeRef) -> Result<FailoverOutcome> {
        {
            let _global = self.redistributor.exclusive().await;
            self.state.registry.swap_roles(primary, standby)?;
            let moved = self
                .state
                .ring
                .write()
                .transfer(primary.address(), standby);
            tracing::info!(
                new_primary = %standby.address(),
                old_primary = %primary.address(),
                ranges = moved.len(),
                "Standby promoted"
            );
        }

        let restarter = Arc::clone(&self.restarter);
        let address = primary.address().to_string();
        tokio::spawn(async move {
            if let Err(e) = restarter.restart_at(&address).await {
                tracing::warn!(node = %address, error = %e, "Restart of demoted primary failed");
            }
        });

        Ok(FailoverOutcome::Promoted {
            new_primary: standby.address().to_string(),
            old_primary: primary.address().to_string(),
        })
    }

    async fn retire(&self, primary: &NodeRef, standby: Option<&NodeRef>) -> Result<FailoverOutcome> {
        let report = self.redistributor.retire(primary, standby).await?;
        Ok(FailoverOutcome::Retired {
            primary: primary.address().to_string(),
            report,
        })
    }

    /// Check every primary concurrently and wait for all of them.
    ///
    /// Retryable failures are logged and left for the next sweep; the
    /// first non-retryable one is returned.
    pub async fn sweep(self: &Arc<Self>) -> Result<Vec<FailoverOutcome>> {
        let primaries = self.state.registry.primaries();
        if primaries.is_empty() {
            tracing::debug!("No primaries registered, nothing to check");
            return Ok(Vec::new());
        }

        let mut tasks = JoinSet::new();
        for primary in primaries {
            let coordinator = Arc::clone(self);
            tasks.spawn(async move {
                let outcome = coordinator.check_primary(&primary).await;
                (primary.address().to_string(), outcome)
            });
        }

        let mut outcomes = Vec::new();
        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => outcomes.push(outcome),
                Ok((node, Err(e))) if e.is_retryable() => {
                    tracing::warn!(node = %node, error = %e, "Liveness check failed, retrying next tick");
                }
                Ok((node, Err(e))) => {
                    tracing::error!(node = %node, error = %e, "Liveness check failed");
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Liveness check task panicked");
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }
}

/// Handle to a running sweep loop. Dropping it stops the loop as well.
pub struct MonitorLoop {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Option<Error>>,
}

impl MonitorLoop {
    /// Ask the loop to stop and wait for it.
    /// Returns the error that ended the loop, if one did.
    pub async fn stop(mut self) -> Option<Error> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Monitor loop task panicked");
            None
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Sweep all primaries every `interval` until stopped or a
/// non-retryable error occurs
pub fn start_monitor_loop(coordinator: Arc<FailoverCoordinator>, interval: Duration) -> MonitorLoop {
    let (stop_tx, mut stop_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        tracing::info!(interval_ms = interval.as_millis() as u64, "Monitor loop started");

        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    tracing::info!("Monitor loop stopped");
                    return None;
                }
                _ = ticker.tick() => {
                    if let Err(e) = coordinator.sweep().await {
                        tracing::error!(error = %e, "Monitor loop terminated");
                        return Some(e);
                    }
                }
            }
        }
    });

    MonitorLoop {
        stop_tx: Some(stop_tx),
        handle,
    }
}
