//! Slot redistribution after a primary/standby pair is lost for good
//!
//! The dead primary's ranges are split evenly, range by range, across the
//! surviving primaries. Its modification log is then replayed and every
//! key is written to its new owner, logged there and forwarded to that
//! owner's standby. Only then are the logs of the dead pair removed.
//!
//! Every rewrite of slot ownership, including a promotion, runs under the
//! redistributor's global lock.

use crate::common::{slot_index, Error, Result, SlotRange};
use crate::coordinator::cluster::ClusterState;
use crate::coordinator::node_client::Command;
use crate::coordinator::registry::NodeRef;
use crate::coordinator::replication::ReplicationForwarder;
use std::sync::Arc;
use tokio::sync::MutexGuard;

/// What a redistribution moved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedistributionReport {
    /// (new owner, range) for every piece handed out
    pub assigned: Vec<(String, SlotRange)>,
    pub migrated_keys: usize,
    /// Keys whose write to the new owner failed
    pub lost_keys: usize,
}

pub struct SlotRedistributor {
    state: Arc<ClusterState>,
    forwarder: ReplicationForwarder,
    lock: tokio::sync::Mutex<()>,
}

impl SlotRedistributor {
    pub fn new(state: Arc<ClusterState>, forwarder: ReplicationForwarder) -> Self {
        Self {
            state,
            forwarder,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Hold off every other ownership change until the guard drops
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Hand the slots and data of `dead` to the surviving primaries and
    /// retire `dead` together with `standby`.
    pub async fn redistribute(
        &self,
        dead: &NodeRef,
        standby: Option<&NodeRef>,
    ) -> Result<RedistributionReport> {
        let _global = self.lock.lock().await;
        if self.state.ring.read().ranges_of(dead.address()).is_empty() {
            return Err(Error::NoRangeAssigned(dead.address().to_string()));
        }
        self.redistribute_locked(dead, standby).await
    }

    /// Retire a dead pair. A primary that never owned slots is simply
    /// dropped with its logs; otherwise its slots are redistributed.
    pub async fn retire(
        &self,
        dead: &NodeRef,
        standby: Option<&NodeRef>,
    ) -> Result<RedistributionReport> {
        let _global = self.lock.lock().await;
        if !self.state.ring.read().ranges_of(dead.address()).is_empty() {
            return self.redistribute_locked(dead, standby).await;
        }

        tracing::info!(node = %dead.address(), "Dead primary owns no slots, dropping it");
        self.drop_pair(dead, standby)?;
        Ok(RedistributionReport::default())
    }

    fn drop_pair(&self, dead: &NodeRef, standby: Option<&NodeRef>) -> Result<()> {
        self.state.modlog.remove(dead.address())?;
        if let Some(standby) = standby {
            self.state.modlog.remove(standby.address())?;
        }
        self.state.registry.remove_pair(dead, standby)
    }

    async fn redistribute_locked(
        &self,
        dead: &NodeRef,
        standby: Option<&NodeRef>,
    ) -> Result<RedistributionReport> {
        let mut report = RedistributionReport::default();

        {
            let mut ring = self.state.ring.write();
            let survivors: Vec<NodeRef> = self
                .state
                .registry
                .primaries()
                .into_iter()
                .filter(|p| p.address() != dead.address() && p.is_primary())
                .collect();
            if survivors.is_empty() {
                return Err(Error::NoSurvivingPrimaries(dead.address().to_string()));
            }

            let ranges = ring.take_ranges(dead.address());
            if ranges.is_empty() {
                return Err(Error::NoRangeAssigned(dead.address().to_string()));
            }
            for range in ranges {
                for (target, piece) in survivors.iter().zip(range.split(survivors.len())) {
                    if piece.is_empty() {
                        continue;
                    }
                    ring.assign_range(target, piece);
                    tracing::info!(from = %dead.address(), to = %target.address(), range = %piece, "Slots reassigned");
                    report.assigned.push((target.address().to_string(), piece));
                }
            }
        }

        let data = self.state.modlog.replay(dead.address())?;
        for (key, value) in data.into_values().flatten() {
            let owner = self
                .state
                .ring
                .read()
                .lookup(slot_index(key.as_bytes()))
                .cloned()
                .ok_or(Error::SlotUnassigned(slot_index(key.as_bytes())))?;

            if self.migrate_key(dead, &owner, &key, &value).await {
                report.migrated_keys += 1;
            } else {
                report.lost_keys += 1;
            }
        }

        self.drop_pair(dead, standby)?;

        tracing::info!(
            node = %dead.address(),
            migrated = report.migrated_keys,
            lost = report.lost_keys,
            "Redistribution complete"
        );
        Ok(report)
    }

    /// Write one key to its new owner; `false` when the key was lost
    async fn migrate_key(&self, dead: &NodeRef, owner: &NodeRef, key: &str, value: &str) -> bool {
        let written = match owner.exec(Command::Set, key, Some(value)).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(owner = %owner.address(), key, error = %e, "Migration write failed");
                // A dead primary that came back means the log may be stale
                match self.state.oracle.ask_alive(dead).await {
                    Ok(vote) if vote.is_alive() => {
                        match owner.exec(Command::Set, key, Some(value)).await {
                            Ok(_) => true,
                            Err(e) => {
                                tracing::warn!(owner = %owner.address(), key, error = %e, "Migration retry failed");
                                false
                            }
                        }
                    }
                    _ => false,
                }
            }
        };

        if let Err(e) = self
            .state
            .modlog
            .append(owner.address(), Command::Set, key, Some(value))
        {
            tracing::warn!(owner = %owner.address(), key, error = %e, "Migration log append failed");
        }
        if written {
            self.forwarder
                .forward(owner, Command::Set, key, Some(value))
                .await;
        }
        written
    }
}
