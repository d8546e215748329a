//! Cluster Manager
//!
//! Owns the authoritative region table and the liveness registry of the
//! elected master. Arrivals split the region picked by `max()`, expiries merge
//! the lost host into its neighbour. Every rebalance follows the same order:
//! notify the affected peer, apply the change to a copy of the table, persist
//! the copy with a compare-and-swap on the leader key, then swap it in. A
//! failure at any step leaves the live table untouched.

use super::liveness::{LivenessRegistry, NodeStatus};
use crate::config::MasterConfig;
use crate::coordination::{bounded, CoordinationService, MASTER_ADDR_KEY, REGION_KEY};
use crate::error::{ClusterError, Result};
use crate::notifier::{NotifierError, PeerNotifier};
use crate::observability::{events, metrics};
use candy_core::{Region, RegionTable};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

struct ClusterState {
    table: RegionTable,
    liveness: LivenessRegistry,
}

pub struct ClusterManager {
    config: MasterConfig,
    coordination: Arc<dyn CoordinationService>,
    notifier: Arc<dyn PeerNotifier>,
    state: RwLock<ClusterState>,
    /// Serializes arrivals and expiries end to end.
    rebalance: Mutex<()>,
    stop_tx: watch::Sender<bool>,
}

impl ClusterManager {
    pub fn new(
        table: RegionTable,
        coordination: Arc<dyn CoordinationService>,
        notifier: Arc<dyn PeerNotifier>,
        config: MasterConfig,
    ) -> Self {
        // hosts restored from a snapshot get one full grace period to check in
        let now = Instant::now();
        let mut liveness = LivenessRegistry::new();
        for region in table.dump() {
            liveness.register(&region.host, now);
        }

        metrics::set_region_count(table.len());
        metrics::set_active_nodes(liveness.len());

        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            coordination,
            notifier,
            state: RwLock::new(ClusterState { table, liveness }),
            rebalance: Mutex::new(()),
            stop_tx,
        }
    }

    /// Build a manager from the snapshot persisted at the region key.
    pub async fn load(
        coordination: Arc<dyn CoordinationService>,
        notifier: Arc<dyn PeerNotifier>,
        config: MasterConfig,
    ) -> Result<Self> {
        let timeout = config.network_timeout;
        let snapshot = bounded(timeout, coordination.get(REGION_KEY)).await?;

        let table = match snapshot {
            Some(raw) => RegionTable::from_snapshot(raw.as_bytes(), config.modulus)?,
            None => RegionTable::new(config.modulus),
        };

        if let Err(e) = table.verify_tiling() {
            warn!(error = %e, "Loaded region table does not tile the key space");
        }

        info!(regions = table.len(), "Cluster loaded");
        Ok(Self::new(table, coordination, notifier, config))
    }

    pub fn modulus(&self) -> i32 {
        self.config.modulus
    }

    /// Heartbeat from a storage node. Unknown hosts are ignored; they join
    /// through `get`.
    pub async fn on_health(&self, host: &str) {
        let known = self.state.write().await.liveness.touch(host, Instant::now());
        metrics::record_heartbeat(known);
        if !known {
            debug!(host = %host, "Heartbeat from unregistered host ignored");
        }
    }

    /// Region of `host`, assigning one if the host is new.
    pub async fn get(&self, host: &str) -> Result<Region> {
        let found = self.state.read().await.table.get_by_host(host);
        let region = match found {
            Ok(region) => region,
            Err(e) if e.is_not_found() => return self.on_node_arrived(host).await,
            Err(e) => return Err(e.into()),
        };

        if !self.state.read().await.liveness.contains(host) {
            // owner whose record was dropped while it was alone in the cluster
            let mut state = self.state.write().await;
            state.liveness.register(host, Instant::now());
            metrics::set_active_nodes(state.liveness.len());
        }

        Ok(region)
    }

    /// Regions in key order.
    pub async fn regions(&self) -> Vec<Region> {
        self.state.read().await.table.dump()
    }

    pub async fn nodes(&self) -> Vec<NodeStatus> {
        self.state.read().await.liveness.snapshot(Instant::now())
    }

    /// Region serving user id `key`.
    pub async fn locate(&self, key: i64) -> Result<Region> {
        Ok(self.state.read().await.table.locate(key)?)
    }

    /// Give `host` a region by splitting the current max region.
    #[tracing::instrument(skip(self))]
    pub async fn on_node_arrived(&self, host: &str) -> Result<Region> {
        let _guard = self.rebalance.lock().await;

        let mut candidate = {
            let mut state = self.state.write().await;
            if let Ok(region) = state.table.get_by_host(host) {
                state.liveness.register(host, Instant::now());
                return Ok(region);
            }
            state.table.clone()
        };

        let (region, donor) = match self.split_into(&mut candidate, host).await {
            Ok(split) => split,
            Err(e) => return Err(self.rebalance_failed("split", host, e)),
        };

        self.commit(candidate, |liveness| liveness.register(host, Instant::now()))
            .await;

        match donor {
            Some(donor) => {
                metrics::record_split();
                events::region_split(&donor, &region);
            }
            None => events::cluster_bootstrapped(&region),
        }
        events::node_arrived(host, &region);

        Ok(region)
    }

    /// Split on `candidate`, notify the donor and persist. Returns the new
    /// region and the donor's shrunk region, `None` on bootstrap.
    async fn split_into(
        &self,
        candidate: &mut RegionTable,
        host: &str,
    ) -> Result<(Region, Option<Region>)> {
        let donor = if candidate.is_empty() {
            candidate.split("", host)?;
            None
        } else {
            let max = candidate.max()?;
            candidate.split(&max.host, host)?;
            let shrunk = candidate.get_by_host(&max.host)?;
            self.notify(&shrunk.host, shrunk.begin, shrunk.end).await?;
            Some(shrunk)
        };

        self.persist(candidate).await?;
        Ok((candidate.get_by_host(host)?, donor))
    }

    /// Fold the region of a lost `host` into its neighbour.
    #[tracing::instrument(skip(self))]
    pub async fn on_node_expired(&self, host: &str) -> Result<()> {
        let _guard = self.rebalance.lock().await;
        self.expire(host).await
    }

    /// Merge `host` away. Caller holds the rebalance lock.
    async fn expire(&self, host: &str) -> Result<()> {
        let mut candidate = self.state.read().await.table.clone();

        let (lost, heir) = match self.merge_into(&mut candidate, host).await {
            Ok(merged) => merged,
            Err(e) if e.is_not_found() => return Err(e),
            Err(e) => return Err(self.rebalance_failed("merge", host, e)),
        };

        let merged = candidate.get_by_host(&heir)?;
        self.commit(candidate, |liveness| {
            liveness.remove(host);
        })
        .await;

        metrics::record_merge();
        events::region_merged(&lost, &merged);
        Ok(())
    }

    /// Merge on `candidate`, notify the heir and persist. Returns the lost
    /// region and the heir's host.
    async fn merge_into(&self, candidate: &mut RegionTable, host: &str) -> Result<(Region, String)> {
        let (current, next) = candidate.next(host)?;
        let (begin, end) = current.union_bounds(&next);
        self.notify(&next.host, begin, end).await?;

        candidate.merge(host, &next.host)?;
        self.persist(candidate).await?;
        Ok((current, next.host))
    }

    /// One liveness sweep: expire every host silent for longer than the
    /// node-lost threshold.
    pub async fn check(&self) {
        let node_lost = self.config.node_lost;
        let expired = {
            let state = self.state.read().await;
            state.liveness.expired(Instant::now(), node_lost)
        };

        for host in expired {
            let _guard = self.rebalance.lock().await;

            // earlier merges of this sweep may have run long enough for a
            // heartbeat to land
            let silent = self
                .state
                .read()
                .await
                .liveness
                .is_expired(&host, Instant::now(), node_lost);
            if !silent {
                debug!(host = %host, "Host reported in before its merge, skipped");
                continue;
            }

            events::node_expired(&host);

            match self.expire(&host).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    let mut state = self.state.write().await;
                    if state.liveness.remove_if_expired(&host, Instant::now(), node_lost) {
                        warn!(host = %host, "Expired host has no neighbour to merge into, dropping it");
                        metrics::set_active_nodes(state.liveness.len());
                    }
                }
                Err(e) => {
                    // record kept, next sweep retries
                    debug!(host = %host, error = %e, "Merge of expired host deferred");
                }
            }
        }
    }

    /// Spawn the periodic liveness sweep. Runs until `stop`.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut stop = self.stop_tx.subscribe();
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip first immediate tick

            debug!(?period, "Liveness sweep started");
            while !*stop.borrow() {
                tokio::select! {
                    _ = ticker.tick() => self.check().await,
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Liveness sweep stopped");
        })
    }

    /// Stop the liveness sweep. Safe to call more than once.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    async fn commit<F>(&self, table: RegionTable, update: F)
    where
        F: FnOnce(&mut LivenessRegistry),
    {
        let mut state = self.state.write().await;
        state.table = table;
        update(&mut state.liveness);
        metrics::set_region_count(state.table.len());
        metrics::set_active_nodes(state.liveness.len());
    }

    async fn notify(&self, host: &str, begin: i32, end: i32) -> Result<()> {
        let timeout = self.config.network_timeout;
        let started = std::time::Instant::now();

        let result = match tokio::time::timeout(timeout, self.notifier.region_set(host, begin, end)).await {
            Ok(result) => result,
            Err(_) => Err(NotifierError::Timeout {
                host: host.to_string(),
                timeout,
            }),
        };

        metrics::record_remote_call("notifier", started.elapsed());
        Ok(result?)
    }

    async fn persist(&self, table: &RegionTable) -> Result<()> {
        let snapshot = table.marshal()?;
        let started = std::time::Instant::now();

        let result = bounded(
            self.config.network_timeout,
            self.coordination.compare_and_swap(
                MASTER_ADDR_KEY,
                &self.config.advertise_addr,
                REGION_KEY,
                &snapshot,
            ),
        )
        .await;

        metrics::record_remote_call("coordination", started.elapsed());
        Ok(result?)
    }

    fn rebalance_failed(&self, op: &str, host: &str, err: ClusterError) -> ClusterError {
        error!(op, host = %host, error = %err, "Rebalance aborted, region table unchanged");
        metrics::record_rebalance_failure(op, err.kind());
        err
    }
}
