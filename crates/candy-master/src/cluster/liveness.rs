//! Liveness Registry
//!
//! Last heartbeat per active storage node. Times are `tokio::time::Instant`
//! so a paused test clock drives expiry deterministically.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct LivenessRecord {
    pub host: String,
    pub last_seen: Instant,
}

impl LivenessRecord {
    pub fn new(host: impl Into<String>, now: Instant) -> Self {
        Self {
            host: host.into(),
            last_seen: now,
        }
    }

    pub fn is_expired(&self, now: Instant, node_lost: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > node_lost
    }
}

/// Reporting view of one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    pub host: String,
    pub seconds_since_heartbeat: f64,
}

#[derive(Debug, Default)]
pub struct LivenessRegistry {
    records: HashMap<String, LivenessRecord>,
}

impl LivenessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `host` active as of `now`, creating the record if needed.
    pub fn register(&mut self, host: &str, now: Instant) {
        self.records
            .entry(host.to_string())
            .and_modify(|record| record.last_seen = now)
            .or_insert_with(|| LivenessRecord::new(host, now));
    }

    /// Refresh an existing record. Returns false for unknown hosts.
    pub fn touch(&mut self, host: &str, now: Instant) -> bool {
        match self.records.get_mut(host) {
            Some(record) => {
                record.last_seen = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, host: &str) -> Option<LivenessRecord> {
        self.records.remove(host)
    }

    /// False for unknown hosts.
    pub fn is_expired(&self, host: &str, now: Instant, node_lost: Duration) -> bool {
        self.records
            .get(host)
            .is_some_and(|record| record.is_expired(now, node_lost))
    }

    /// Drop `host` only if it is still silent. Returns whether it was removed.
    pub fn remove_if_expired(&mut self, host: &str, now: Instant, node_lost: Duration) -> bool {
        if !self.is_expired(host, now, node_lost) {
            return false;
        }
        self.records.remove(host).is_some()
    }

    pub fn contains(&self, host: &str) -> bool {
        self.records.contains_key(host)
    }

    /// Hosts silent for longer than `node_lost`, sorted for a stable sweep order.
    pub fn expired(&self, now: Instant, node_lost: Duration) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .records
            .values()
            .filter(|record| record.is_expired(now, node_lost))
            .map(|record| record.host.clone())
            .collect();
        hosts.sort();
        hosts
    }

    pub fn snapshot(&self, now: Instant) -> Vec<NodeStatus> {
        let mut nodes: Vec<NodeStatus> = self
            .records
            .values()
            .map(|record| NodeStatus {
                host: record.host.clone(),
                seconds_since_heartbeat: now.saturating_duration_since(record.last_seen).as_secs_f64(),
            })
            .collect();
        nodes.sort_by(|a, b| a.host.cmp(&b.host));
        nodes
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expiry_threshold_is_exclusive() {
        let mut registry = LivenessRegistry::new();
        let start = Instant::now();
        registry.register("a", start);

        let lost = Duration::from_secs(2);
        assert!(registry.expired(start + lost, lost).is_empty());
        assert_eq!(registry.expired(start + lost + Duration::from_millis(1), lost), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_unknown_is_noop() {
        let mut registry = LivenessRegistry::new();

        assert!(!registry.touch("ghost", Instant::now()));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_resets_clock() {
        let mut registry = LivenessRegistry::new();
        let start = Instant::now();
        registry.register("a", start);

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(registry.touch("a", Instant::now()));

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(registry.expired(Instant::now(), Duration::from_secs(2)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_if_expired_spares_fresh_record() {
        let mut registry = LivenessRegistry::new();
        let start = Instant::now();
        let lost = Duration::from_secs(2);
        registry.register("a", start);
        registry.register("b", start);

        tokio::time::advance(Duration::from_secs(3)).await;
        registry.touch("b", Instant::now());

        assert!(registry.remove_if_expired("a", Instant::now(), lost));
        assert!(!registry.remove_if_expired("b", Instant::now(), lost));
        assert!(!registry.remove_if_expired("ghost", Instant::now(), lost));
        assert!(!registry.contains("a"));
        assert!(registry.contains("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_sorted() {
        let mut registry = LivenessRegistry::new();
        let now = Instant::now();
        registry.register("b", now);
        registry.register("a", now);

        let hosts: Vec<_> = registry.snapshot(now).into_iter().map(|n| n.host).collect();
        assert_eq!(hosts, vec!["a", "b"]);
    }
}
