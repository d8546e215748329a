//! Master Configuration
//!
//! All tunables of the master in one place, with defaults matching the
//! deployed cluster and environment variable overrides.

use candy_core::DEFAULT_MODULUS;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MasterConfig {
    // Key space
    /// Size of the user-id ring (env: REGION_MODULUS)
    pub modulus: i32,

    // Liveness
    /// Silence after which a storage node is declared lost (env: NODE_LOST_MS)
    pub node_lost: Duration,

    /// Period of the liveness sweep (env: SWEEP_INTERVAL_MS)
    pub sweep_interval: Duration,

    /// Upper bound on any single notifier or coordination call (env: NETWORK_TIMEOUT_MS)
    pub network_timeout: Duration,

    // Id allocation
    /// Period between writes of the id watermark (env: ID_SAVE_INTERVAL_MS)
    pub id_save_interval: Duration,

    // Addresses
    /// HTTP listen address (env: BIND_ADDR)
    pub bind_addr: String,

    /// Address other processes use to reach this master, written to the
    /// leader key when elected (env: ADVERTISE_ADDR)
    pub advertise_addr: String,

    // Coordination store
    /// Etcd endpoints, empty for standalone mode (env: ETCD_ENDPOINTS, comma-separated)
    pub etcd_endpoints: Vec<String>,

    /// TTL of the leader lease in seconds (env: LEADER_LEASE_TTL)
    pub lease_ttl: i64,

    /// Interval between lease keep-alives
    pub keepalive_interval: Duration,

    /// Pause before campaigning again after the leader watch fails
    pub campaign_retry_delay: Duration,

    // Etcd backoff settings
    pub etcd_backoff_initial: Duration,
    pub etcd_backoff_max: Duration,
    pub etcd_backoff_max_elapsed: Duration,
    pub etcd_backoff_multiplier: f64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            modulus: DEFAULT_MODULUS,

            node_lost: Duration::from_secs(2),
            sweep_interval: Duration::from_secs(1),
            network_timeout: Duration::from_secs(3),
            id_save_interval: Duration::from_secs(1),

            bind_addr: "0.0.0.0:9000".to_string(),
            advertise_addr: "127.0.0.1:9000".to_string(),

            etcd_endpoints: Vec::new(),
            lease_ttl: 1,
            keepalive_interval: Duration::from_millis(300),
            campaign_retry_delay: Duration::from_secs(1),

            etcd_backoff_initial: Duration::from_secs(1),
            etcd_backoff_max: Duration::from_secs(10),
            etcd_backoff_max_elapsed: Duration::from_secs(60),
            etcd_backoff_multiplier: 2.0,
        }
    }
}

impl MasterConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any name -> value source. Unparseable values are
    /// ignored and the default kept.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(modulus) = parse(&lookup, "REGION_MODULUS").filter(|m: &i32| *m > 0) {
            config.modulus = modulus;
        }
        if let Some(ms) = parse(&lookup, "NODE_LOST_MS") {
            config.node_lost = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "SWEEP_INTERVAL_MS").filter(|ms: &u64| *ms > 0) {
            config.sweep_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "ID_SAVE_INTERVAL_MS").filter(|ms: &u64| *ms > 0) {
            config.id_save_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "NETWORK_TIMEOUT_MS") {
            config.network_timeout = Duration::from_millis(ms);
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(addr) = lookup("ADVERTISE_ADDR") {
            config.advertise_addr = addr;
        }
        if let Some(endpoints) = lookup("ETCD_ENDPOINTS") {
            config.etcd_endpoints = split_endpoints(&endpoints);
        }
        if let Some(ttl) = parse(&lookup, "LEADER_LEASE_TTL").filter(|ttl: &i64| *ttl > 0) {
            config.lease_ttl = ttl;
            config.keepalive_interval = Duration::from_millis(ttl as u64 * 1000 / 3);
        }

        config
    }

    /// Standalone mode keeps the region snapshot in memory and is always leader.
    pub fn is_standalone(&self) -> bool {
        self.etcd_endpoints.is_empty()
    }
}

fn parse<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|value| value.trim().parse().ok())
}

pub fn split_endpoints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
