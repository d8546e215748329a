//! Id Allocator
//!
//! Hands out cluster-unique 64-bit ids while this process is the elected
//! master. An id is `unix_seconds << 32` plus a per-second sequence starting
//! at 1. The second in use is written to `/master/id` periodically, and a newly
//! elected master waits until the wall clock has passed the persisted value
//! before issuing anything.

use crate::config::MasterConfig;
use crate::coordination::{bounded, CoordinationService, ID_KEY, MASTER_ADDR_KEY};
use crate::error::{ClusterError, Result};
use crate::observability::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Sequence numbers per second before the allocator waits for the next one.
const MAX_SEQ: i64 = i32::MAX as i64;

const CLOCK_WAIT: Duration = Duration::from_millis(100);

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

struct Sequence {
    last: i64,
    seq: i64,
}

pub struct IdAllocator {
    config: MasterConfig,
    coordination: Arc<dyn CoordinationService>,
    sequence: Mutex<Sequence>,
    stop_tx: watch::Sender<bool>,
}

impl IdAllocator {
    /// Read the persisted watermark and wait until the clock is past it.
    pub async fn load(coordination: Arc<dyn CoordinationService>, config: MasterConfig) -> Result<Self> {
        let persisted = bounded(config.network_timeout, coordination.get(ID_KEY)).await?;
        let last = match persisted {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| ClusterError::InvalidWatermark(raw))?,
            None => 0,
        };

        while unix_now() <= last {
            debug!(now = unix_now(), last, "Clock behind persisted id watermark, waiting");
            tokio::time::sleep(CLOCK_WAIT).await;
        }

        info!(last, "Id allocator loaded");
        let (stop_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            coordination,
            sequence: Mutex::new(Sequence { last, seq: 0 }),
            stop_tx,
        })
    }

    /// Next id. Blocks while the clock is behind the watermark or the current
    /// second is used up.
    pub async fn next_id(&self) -> i64 {
        let mut sequence = self.sequence.lock().await;

        let now = loop {
            let now = unix_now();
            let exhausted = now == sequence.last && sequence.seq >= MAX_SEQ;
            if now >= sequence.last && !exhausted {
                break now;
            }
            debug!(now, last = sequence.last, "Waiting for the clock to advance");
            tokio::time::sleep(CLOCK_WAIT).await;
        };

        if now != sequence.last {
            sequence.last = now;
            sequence.seq = 0;
        }
        sequence.seq += 1;

        metrics::record_id_allocated();
        (sequence.last << 32) + sequence.seq
    }

    /// Spawn the watermark writer. Runs until `stop`.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut stop = self.stop_tx.subscribe();
        let period = self.config.id_save_interval;

        tokio::spawn(async move {
            let mut saved = self.sequence.lock().await.last;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip first immediate tick

            debug!(?period, "Id watermark writer started");
            while !*stop.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {
                        let last = self.sequence.lock().await.last;
                        if last == saved {
                            continue;
                        }
                        match self.save(last).await {
                            Ok(()) => saved = last,
                            Err(e) => error!(last, error = %e, "Failed to save id watermark"),
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Id watermark writer stopped");
        })
    }

    /// Stop the watermark writer. Safe to call more than once.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    async fn save(&self, last: i64) -> Result<()> {
        bounded(
            self.config.network_timeout,
            self.coordination.compare_and_swap(
                MASTER_ADDR_KEY,
                &self.config.advertise_addr,
                ID_KEY,
                &last.to_string(),
            ),
        )
        .await?;
        Ok(())
    }
}
