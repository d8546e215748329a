//! Leader-Gated Master
//!
//! Holds a `ClusterManager` and an `IdAllocator` only while this process is
//! the elected master. Both are loaded from the coordination store on every
//! election so a new leader always starts from what the previous one committed.

use crate::allocator::IdAllocator;
use crate::cluster::ClusterManager;
use crate::config::MasterConfig;
use crate::coordination::CoordinationService;
use crate::error::Result;
use crate::notifier::PeerNotifier;
use crate::observability::{events, metrics};
use candy_core::Region;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

struct Leadership {
    manager: Arc<ClusterManager>,
    sweep: JoinHandle<()>,
    allocator: Arc<IdAllocator>,
    saver: JoinHandle<()>,
}

pub struct Master {
    config: MasterConfig,
    coordination: Arc<dyn CoordinationService>,
    notifier: Arc<dyn PeerNotifier>,
    leadership: RwLock<Option<Leadership>>,
}

impl Master {
    pub fn new(
        config: MasterConfig,
        coordination: Arc<dyn CoordinationService>,
        notifier: Arc<dyn PeerNotifier>,
    ) -> Self {
        Self {
            config,
            coordination,
            notifier,
            leadership: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn coordination(&self) -> &Arc<dyn CoordinationService> {
        &self.coordination
    }

    /// The live cluster, `None` unless leader.
    pub async fn cluster(&self) -> Option<Arc<ClusterManager>> {
        self.leadership
            .read()
            .await
            .as_ref()
            .map(|leadership| leadership.manager.clone())
    }

    /// The id allocator, `None` unless leader.
    pub async fn allocator(&self) -> Option<Arc<IdAllocator>> {
        self.leadership
            .read()
            .await
            .as_ref()
            .map(|leadership| leadership.allocator.clone())
    }

    pub async fn is_leader(&self) -> bool {
        self.leadership.read().await.is_some()
    }

    /// All regions, or the whole key space with no owner when this process
    /// is not the leader.
    pub async fn regions(&self) -> Vec<Region> {
        match self.cluster().await {
            Some(cluster) => cluster.regions().await,
            None => vec![Region::new("", 0, self.config.modulus)],
        }
    }

    /// Load the cluster and the id allocator and start their background
    /// tasks. No-op if already leader.
    pub async fn become_leader(&self) -> Result<()> {
        if self.is_leader().await {
            return Ok(());
        }

        // the store round trips happen outside the leadership lock
        let manager = Arc::new(
            ClusterManager::load(
                self.coordination.clone(),
                self.notifier.clone(),
                self.config.clone(),
            )
            .await?,
        );
        let allocator =
            Arc::new(IdAllocator::load(self.coordination.clone(), self.config.clone()).await?);

        let mut leadership = self.leadership.write().await;
        if leadership.is_some() {
            return Ok(());
        }

        let sweep = manager.clone().start();
        let saver = allocator.clone().start();
        *leadership = Some(Leadership {
            manager,
            sweep,
            allocator,
            saver,
        });
        metrics::set_leader(true);
        events::leadership_changed(&self.config.advertise_addr, true);
        Ok(())
    }

    /// Stop the background tasks and drop the cluster. No-op if not leader.
    pub async fn step_down(&self) {
        let Some(leadership) = self.leadership.write().await.take() else {
            return;
        };

        leadership.manager.stop();
        leadership.allocator.stop();
        if let Err(e) = leadership.sweep.await {
            error!(error = %e, "Liveness sweep task failed");
        }
        if let Err(e) = leadership.saver.await {
            error!(error = %e, "Id watermark task failed");
        }

        metrics::set_leader(false);
        events::leadership_changed(&self.config.advertise_addr, false);
    }

    /// Track leadership published by the campaign until the channel closes.
    pub fn follow(self: Arc<Self>, mut leader: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let elected = *leader.borrow_and_update();

                if elected {
                    if let Err(e) = self.become_leader().await {
                        error!(error = %e, "Failed to load cluster after election, retrying");
                        tokio::select! {
                            _ = tokio::time::sleep(self.config.campaign_retry_delay) => continue,
                            changed = leader.changed() => if changed.is_err() { break },
                        }
                        continue;
                    }
                } else {
                    self.step_down().await;
                }

                if leader.changed().await.is_err() {
                    break;
                }
            }

            self.step_down().await;
            debug!("Leadership follower stopped");
        })
    }

    /// Release leadership on shutdown.
    pub async fn shutdown(&self) {
        info!("Master shutting down");
        self.step_down().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{
        MemoryCoordination, WatchKind, ID_KEY, MASTER_ADDR_KEY, REGION_KEY,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    struct NullNotifier;

    #[async_trait]
    impl PeerNotifier for NullNotifier {
        async fn region_set(&self, _host: &str, _begin: i32, _end: i32) -> crate::notifier::Result<()> {
            Ok(())
        }
    }

    /// Memory store whose reads take `delay`.
    struct SlowStore {
        inner: MemoryCoordination,
        delay: Duration,
    }

    #[async_trait]
    impl CoordinationService for SlowStore {
        async fn get(&self, key: &str) -> crate::coordination::Result<Option<String>> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(key).await
        }

        async fn compare_and_swap(
            &self,
            cmp_key: &str,
            cmp_value: &str,
            key: &str,
            value: &str,
        ) -> crate::coordination::Result<()> {
            self.inner.compare_and_swap(cmp_key, cmp_value, key, value).await
        }

        async fn watch(&self, key: &str, kind: WatchKind) -> crate::coordination::Result<()> {
            self.inner.watch(key, kind).await
        }

        async fn ping(&self) -> crate::coordination::Result<()> {
            self.inner.ping().await
        }
    }

    fn master() -> (Arc<Master>, Arc<MemoryCoordination>) {
        let config = MasterConfig::default();
        let store = Arc::new(MemoryCoordination::new());
        store.put(MASTER_ADDR_KEY, &config.advertise_addr);
        let master = Arc::new(Master::new(config, store.clone(), Arc::new(NullNotifier)));
        (master, store)
    }

    async fn wait_for(master: &Master, leader: bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while master.is_leader().await != leader {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_follower_reports_whole_key_space() {
        let (master, _) = master();

        assert!(!master.is_leader().await);
        assert_eq!(master.regions().await, vec![Region::new("", 0, 9973)]);
    }

    #[tokio::test]
    async fn test_leader_loads_persisted_regions() {
        let (master, store) = master();
        store.put(
            REGION_KEY,
            r#"{"a:1":{"Begin":0,"End":9973,"Host":"a:1"}}"#,
        );

        master.become_leader().await.unwrap();

        assert_eq!(master.regions().await, vec![Region::new("a:1", 0, 9973)]);
        master.step_down().await;
        assert_eq!(master.regions().await, vec![Region::new("", 0, 9973)]);
    }

    #[tokio::test]
    async fn test_become_leader_fails_on_corrupt_snapshot() {
        let (master, store) = master();
        store.put(REGION_KEY, "not json");

        assert!(master.become_leader().await.is_err());
        assert!(!master.is_leader().await);
    }

    #[tokio::test]
    async fn test_ids_only_while_leader() {
        let (master, _) = master();
        assert!(master.allocator().await.is_none());

        master.become_leader().await.unwrap();
        let allocator = master.allocator().await.unwrap();
        let first = allocator.next_id().await;
        assert!(allocator.next_id().await > first);

        master.step_down().await;
        assert!(master.allocator().await.is_none());
    }

    #[tokio::test]
    async fn test_become_leader_fails_on_corrupt_watermark() {
        let (master, store) = master();
        store.put(ID_KEY, "not a number");

        assert!(master.become_leader().await.is_err());
        assert!(!master.is_leader().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_proceed_while_leader_loads() {
        let config = MasterConfig::default();
        let inner = MemoryCoordination::new();
        inner.put(MASTER_ADDR_KEY, &config.advertise_addr);
        let store = Arc::new(SlowStore {
            inner,
            delay: Duration::from_secs(2),
        });
        let master = Arc::new(Master::new(config, store, Arc::new(NullNotifier)));

        let election = {
            let master = master.clone();
            tokio::spawn(async move { master.become_leader().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let regions = tokio::time::timeout(Duration::from_millis(10), master.regions())
            .await
            .expect("regions blocked behind the leader load");
        assert_eq!(regions, vec![Region::new("", 0, 9973)]);

        election.await.unwrap().unwrap();
        assert!(master.is_leader().await);
        master.step_down().await;
    }

    #[tokio::test]
    async fn test_follow_tracks_elections() {
        let (master, _) = master();
        let (tx, rx) = watch::channel(false);
        let follower = master.clone().follow(rx);

        tx.send_replace(true);
        wait_for(&master, true).await;

        tx.send_replace(false);
        wait_for(&master, false).await;

        tx.send_replace(true);
        wait_for(&master, true).await;

        drop(tx);
        follower.await.unwrap();
        assert!(!master.is_leader().await);
    }
}
