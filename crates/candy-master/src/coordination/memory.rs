//! In-Memory Coordination Store
//!
//! Single-process stand-in for etcd. Writes are linearised by one mutex and
//! every mutation is broadcast so `watch` callers can wait for events.

use super::{CoordinationError, CoordinationService, Result, WatchKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone)]
struct KeyEvent {
    key: String,
    kind: WatchKind,
}

pub struct MemoryCoordination {
    data: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<KeyEvent>,
}

impl Default for MemoryCoordination {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordination {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            data: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Unconditional write, used to seed the store.
    pub fn put(&self, key: &str, value: &str) {
        self.lock().insert(key.to_string(), value.to_string());
        self.publish(key, WatchKind::Put);
    }

    pub fn delete(&self, key: &str) -> Option<String> {
        let removed = self.lock().remove(key);
        if removed.is_some() {
            self.publish(key, WatchKind::Delete);
        }
        removed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // every write is a single insert or remove, so a poisoned map is intact
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, key: &str, kind: WatchKind) {
        trace!(key = %key, ?kind, "Memory store event");
        let _ = self.events.send(KeyEvent {
            key: key.to_string(),
            kind,
        });
    }
}

#[async_trait]
impl CoordinationService for MemoryCoordination {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    async fn compare_and_swap(
        &self,
        cmp_key: &str,
        cmp_value: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        {
            let mut data = self.lock();
            let matches = match data.get(cmp_key) {
                None => cmp_value.is_empty(),
                Some(current) => current == cmp_value,
            };
            if !matches {
                return Err(CoordinationError::CompareFailed {
                    key: cmp_key.to_string(),
                });
            }
            data.insert(key.to_string(), value.to_string());
        }

        self.publish(key, WatchKind::Put);
        Ok(())
    }

    async fn watch(&self, key: &str, kind: WatchKind) -> Result<()> {
        let mut events = self.events.subscribe();
        loop {
            match events.recv().await {
                Ok(event) if event.key == key && event.kind == kind => return Ok(()),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "Memory store watcher lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(CoordinationError::Closed(key.to_string()));
                }
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
