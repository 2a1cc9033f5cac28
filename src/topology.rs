// src/topology.rs

//! The mutable record of known sentinels, the preferred sentinel, and the
//! currently resolved master, plus the discovery pass that grows and
//! re-ranks the sentinel set.

use crate::connection::Connection;
use crate::errors::SentinelPoolError;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Ceiling for the latency scan; a sentinel slower than this never becomes
/// preferred, even when every other candidate timed out.
const LATENCY_CEILING: Duration = Duration::from_secs(1);

/// Per-candidate connect budget during the latency scan.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Known sentinel addresses, the preferred sentinel, and the resolved master.
///
/// The known set is append-only and deduplicated by exact string match; the
/// preferred sentinel is always a member of it. Mutation happens only inside
/// the serialized reset sequence, so a plain exclusive lock around the whole
/// struct is sufficient.
#[derive(Debug, Clone)]
pub struct Topology {
    sentinels: Vec<String>,
    preferred: String,
    master: String,
}

impl Topology {
    /// Seeds the cache with the bootstrap sentinel address, which also
    /// becomes the initial preferred sentinel.
    pub fn new(bootstrap_addr: String) -> Self {
        Self {
            sentinels: vec![bootstrap_addr.clone()],
            preferred: bootstrap_addr,
            master: String::new(),
        }
    }

    /// Known sentinel addresses in discovered order.
    pub fn sentinels(&self) -> &[String] {
        &self.sentinels
    }

    pub fn preferred(&self) -> &str {
        if self.preferred.is_empty() {
            &self.sentinels[0]
        } else {
            &self.preferred
        }
    }

    /// Resolved master address; empty while no master is known.
    pub fn master(&self) -> &str {
        &self.master
    }

    pub fn set_master(&mut self, addr: String) {
        self.master = addr;
    }

    pub fn clear_master(&mut self) {
        self.master.clear();
    }

    /// Appends every address not already known. The set never shrinks.
    pub fn merge_peers(&mut self, peers: impl IntoIterator<Item = String>) {
        for peer in peers {
            if !self.sentinels.iter().any(|known| known == &peer) {
                debug!("Adding sentinel {}", peer);
                self.sentinels.push(peer);
            }
        }
    }

    pub fn set_preferred(&mut self, addr: String) {
        debug_assert!(self.sentinels.contains(&addr));
        self.preferred = addr;
    }
}

/// Picks the address with the strictly smallest probe latency under the
/// ceiling. Ties, failed probes, and all-timeout scans keep the incumbent
/// unchanged, so equal latencies never cause flapping.
pub fn select_preferred(incumbent: &str, probes: &[(String, Option<Duration>)]) -> String {
    let mut fastest = LATENCY_CEILING;
    let mut choice = incumbent.to_string();
    for (addr, latency) in probes {
        if let Some(elapsed) = latency {
            if *elapsed < fastest {
                fastest = *elapsed;
                choice = addr.clone();
            }
        }
    }
    choice
}

/// One discovery pass: learn peer sentinels from the preferred sentinel,
/// merge them into the known set, then latency-rank every known sentinel to
/// pick a new preferred one.
///
/// The lock is never held across a network round trip; discovery runs only
/// inside the serialized reset sequence (or bootstrap), so the snapshot
/// cannot be invalidated by a concurrent writer.
pub(crate) async fn discover(
    topology: &Mutex<Topology>,
    master_name: &str,
) -> Result<(), SentinelPoolError> {
    let preferred = topology.lock().preferred().to_string();

    let mut conn = Connection::connect(&preferred).await?;
    let peers = conn.sentinel_peers(master_name).await?;
    drop(conn);

    let candidates: Vec<String> = {
        let mut topology = topology.lock();
        topology.merge_peers(peers);
        topology.sentinels().to_vec()
    };

    let mut probes = Vec::with_capacity(candidates.len());
    for addr in candidates {
        let started = Instant::now();
        let latency = match Connection::connect_with_timeout(&addr, PROBE_TIMEOUT).await {
            Ok(_) => Some(started.elapsed()),
            // Unresponsive right now, but kept in the known set: it may
            // still hold useful sentinel data later.
            Err(_) => None,
        };
        probes.push((addr, latency));
    }

    let mut topology = topology.lock();
    let next = select_preferred(topology.preferred(), &probes);
    if next != topology.preferred() {
        debug!("Preferred sentinel is now {}", next);
    } else if probes.iter().all(|(_, latency)| latency.is_none()) {
        warn!("No sentinel responded within the probe timeout; keeping {preferred}");
    }
    topology.set_preferred(next);
    Ok(())
}
