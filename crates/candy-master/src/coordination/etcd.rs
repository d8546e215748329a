//! Etcd Coordination Backend
//!
//! Snapshot reads, compare-and-swap writes and key watches against etcd, plus
//! the leader campaign that decides which master owns the cluster.

use super::{CoordinationError, CoordinationService, Result, WatchKind, MASTER_ADDR_KEY};
use crate::config::MasterConfig;
use anyhow::anyhow;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use etcd_client::{
    Client, Compare, CompareOp, EventType, LeaseKeepAliveStream, LeaseKeeper, PutOptions, Txn,
    TxnOp, WatchOptions,
};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Outcome of one attempt to create the leader key.
enum Claim {
    Won { lease_id: i64 },
    /// Someone else holds the key as of `revision`.
    Lost { revision: i64 },
}

pub struct EtcdCoordination {
    client: Client,
    timeout: Duration,
}

impl EtcdCoordination {
    /// Connect to etcd with exponential backoff
    pub async fn connect(config: &MasterConfig) -> anyhow::Result<Self> {
        let backoff = ExponentialBackoff {
            initial_interval: config.etcd_backoff_initial,
            max_interval: config.etcd_backoff_max,
            max_elapsed_time: Some(config.etcd_backoff_max_elapsed),
            multiplier: config.etcd_backoff_multiplier,
            ..Default::default()
        };

        let endpoints = config.etcd_endpoints.clone();
        let client = retry(backoff, || async {
            match Client::connect(&endpoints, None).await {
                Ok(client) => {
                    debug!(endpoints = ?endpoints, "Connected to etcd");
                    Ok(client)
                }
                Err(e) => {
                    warn!(error = %e, "etcd connection failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
        .map_err(|e| anyhow!("Failed to connect to etcd after retries: {:?}", e))?;

        Ok(Self {
            client,
            timeout: config.network_timeout,
        })
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, etcd_client::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CoordinationError::Timeout(self.timeout)),
        }
    }

    /// Compete for leadership until `shutdown` flips to true.
    ///
    /// The winner holds `/master/addr` under a lease and keeps it alive; the
    /// losers block until the key disappears and try again. Every change of
    /// leadership is published on `leader`.
    pub async fn campaign(
        &self,
        config: &MasterConfig,
        leader: watch::Sender<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let addr = config.advertise_addr.as_str();

        while !*shutdown.borrow() {
            match self.try_claim(addr, config.lease_ttl).await {
                Ok(Claim::Won { lease_id }) => {
                    info!(addr = %addr, lease_id, "Elected master");
                    leader.send_replace(true);

                    let held = self.hold(lease_id, config.keepalive_interval, &mut shutdown).await;

                    leader.send_replace(false);
                    if let Err(e) = held {
                        warn!(error = %e, lease_id, "Lost master lease");
                    }
                    if *shutdown.borrow() {
                        self.resign(lease_id).await;
                    }
                }
                Ok(Claim::Lost { revision }) => {
                    debug!(revision, "Another master is elected, waiting for it to step down");
                    tokio::select! {
                        result = self.wait_deleted(MASTER_ADDR_KEY, revision) => {
                            if let Err(e) = result {
                                warn!(error = %e, "Leader watch failed");
                                tokio::time::sleep(config.campaign_retry_delay).await;
                            }
                        }
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Campaign attempt failed");
                    tokio::select! {
                        _ = tokio::time::sleep(config.campaign_retry_delay) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        debug!("Campaign stopped");
    }

    /// Create `/master/addr` under a fresh lease if nobody holds it.
    async fn try_claim(&self, addr: &str, ttl: i64) -> Result<Claim> {
        let mut client = self.client.clone();
        let lease_id = self.bounded(client.lease_grant(ttl, None)).await?.id();

        let txn = Txn::new()
            .when(vec![Compare::create_revision(
                MASTER_ADDR_KEY,
                CompareOp::Equal,
                0,
            )])
            .and_then(vec![TxnOp::put(
                MASTER_ADDR_KEY,
                addr,
                Some(PutOptions::new().with_lease(lease_id)),
            )]);

        let resp = self.bounded(client.txn(txn)).await?;
        if resp.succeeded() {
            return Ok(Claim::Won { lease_id });
        }

        self.resign(lease_id).await;
        let revision = resp.header().map(|h| h.revision()).unwrap_or_default();
        Ok(Claim::Lost { revision })
    }

    /// Wait for a delete of `key` after `revision`, so a delete landing
    /// between the failed claim and the watch is still seen.
    async fn wait_deleted(&self, key: &str, revision: i64) -> Result<()> {
        let options = (revision > 0).then(|| WatchOptions::new().with_start_revision(revision + 1));
        self.watch_events(key, options, WatchKind::Delete).await
    }

    async fn watch_events(
        &self,
        key: &str,
        options: Option<WatchOptions>,
        kind: WatchKind,
    ) -> Result<()> {
        let mut client = self.client.clone();
        let (_watcher, mut stream) = self.bounded(client.watch(key, options)).await?;

        while let Some(resp) = stream.message().await? {
            if resp.canceled() {
                return Err(CoordinationError::Closed(format!("watch on {key} canceled")));
            }

            let hit = resp.events().iter().any(|event| {
                matches!(
                    (event.event_type(), kind),
                    (EventType::Put, WatchKind::Put) | (EventType::Delete, WatchKind::Delete)
                )
            });
            if hit {
                return Ok(());
            }
        }

        Err(CoordinationError::Closed(format!("watch on {key} ended")))
    }

    /// Keep the lease alive until it fails or shutdown is requested.
    async fn hold(
        &self,
        lease_id: i64,
        interval: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let mut client = self.client.clone();
        let (keeper, stream) = self.bounded(client.lease_keep_alive(lease_id)).await?;

        tokio::select! {
            result = keep_alive(keeper, stream, lease_id, interval, self.timeout) => result,
            _ = shutdown.changed() => Ok(()),
        }
    }

    async fn resign(&self, lease_id: i64) {
        let mut client = self.client.clone();
        if let Err(e) = self.bounded(client.lease_revoke(lease_id)).await {
            debug!(error = %e, lease_id, "Lease revoke failed, letting it expire");
        }
    }
}

async fn keep_alive(
    mut keeper: LeaseKeeper,
    mut stream: LeaseKeepAliveStream,
    lease_id: i64,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        keeper.keep_alive().await?;

        match tokio::time::timeout(timeout, stream.message()).await {
            Ok(Ok(Some(resp))) if resp.ttl() > 0 => {
                trace!(lease_id, ttl = resp.ttl(), "Keep-alive OK");
            }
            Ok(Ok(Some(_))) => {
                error!(lease_id, "Lease expired");
                return Err(CoordinationError::Closed(format!("lease {lease_id} expired")));
            }
            Ok(Ok(None)) => {
                error!(lease_id, "Keep-alive stream closed");
                return Err(CoordinationError::Closed(format!("lease {lease_id} stream closed")));
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(CoordinationError::Timeout(timeout)),
        }
    }
}

#[async_trait]
impl CoordinationService for EtcdCoordination {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut client = self.client.clone();
        let resp = self.bounded(client.get(key, None)).await?;

        match resp.kvs().first() {
            Some(kv) => Ok(Some(kv.value_str()?.to_string())),
            None => Ok(None),
        }
    }

    async fn compare_and_swap(
        &self,
        cmp_key: &str,
        cmp_value: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let compare = if cmp_value.is_empty() {
            Compare::create_revision(cmp_key, CompareOp::Equal, 0)
        } else {
            Compare::value(cmp_key, CompareOp::Equal, cmp_value)
        };

        let txn = Txn::new()
            .when(vec![compare])
            .and_then(vec![TxnOp::put(key, value, None)]);

        let mut client = self.client.clone();
        if self.bounded(client.txn(txn)).await?.succeeded() {
            trace!(cmp_key = %cmp_key, key = %key, "Compare-and-swap applied");
            Ok(())
        } else {
            Err(CoordinationError::CompareFailed {
                key: cmp_key.to_string(),
            })
        }
    }

    async fn watch(&self, key: &str, kind: WatchKind) -> Result<()> {
        self.watch_events(key, None, kind).await
    }

    async fn ping(&self) -> Result<()> {
        let mut client = self.client.clone();
        self.bounded(client.status()).await?;
        Ok(())
    }
}
