//! Structured Events
//!
//! One function per cluster event so field names stay consistent in logs.
//!
//! Event types:
//! - `cluster_bootstrapped` - first host received the whole key space
//! - `region_split` - a host gave up the upper half of its region
//! - `region_merged` - a lost host's region was folded into its neighbour
//! - `node_arrived` - a host was assigned a region
//! - `node_expired` - a host missed heartbeats past the node-lost threshold
//! - `leadership_changed` - this master gained or lost leadership

use candy_core::Region;
use tracing::{info, warn};

pub fn cluster_bootstrapped(region: &Region) {
    info!(
        event_type = "cluster_bootstrapped",
        host = %region.host,
        begin = region.begin,
        end = region.end,
        "Cluster bootstrapped"
    );
}

pub fn region_split(donor: &Region, carved: &Region) {
    info!(
        event_type = "region_split",
        donor = %donor.host,
        donor_begin = donor.begin,
        donor_end = donor.end,
        host = %carved.host,
        begin = carved.begin,
        end = carved.end,
        "Region split"
    );
}

pub fn region_merged(lost: &Region, merged: &Region) {
    info!(
        event_type = "region_merged",
        lost = %lost.host,
        lost_begin = lost.begin,
        lost_end = lost.end,
        heir = %merged.host,
        begin = merged.begin,
        end = merged.end,
        "Region merged"
    );
}

pub fn node_arrived(host: &str, region: &Region) {
    info!(
        event_type = "node_arrived",
        host = %host,
        begin = region.begin,
        end = region.end,
        "Node arrived"
    );
}

pub fn node_expired(host: &str) {
    warn!(event_type = "node_expired", host = %host, "Node expired");
}

pub fn leadership_changed(addr: &str, is_leader: bool) {
    if is_leader {
        info!(event_type = "leadership_changed", addr = %addr, is_leader, "Leadership acquired");
    } else {
        warn!(event_type = "leadership_changed", addr = %addr, is_leader, "Leadership lost");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_functions_dont_panic() {
        let whole = Region::new("a", 0, 9973);
        let upper = Region::new("b", 4987, 9973);

        cluster_bootstrapped(&whole);
        region_split(&Region::new("a", 0, 4987), &upper);
        region_merged(&upper, &whole);
        node_arrived("b", &upper);
        node_expired("b");
        leadership_changed("127.0.0.1:9000", true);
        leadership_changed("127.0.0.1:9000", false);
    }
}
