//! Gossip coordination: per-source regossip cooldowns and dedup caches.

use parking_lot::{Mutex, RwLock};
use shared_crypto::{keccak256, keccak256_many};
use shared_types::{Address, ValidatorConnSet};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Tracks when this node last regossiped a message from each source
/// address, one map per gossip kind. Own-address traffic bypasses the
/// cooldown so that proxies always forward their proxied validator's
/// messages.
///
/// Each map has its own mutex with short critical sections; the two are
/// never acquired together.
pub struct GossipCooldownTracker {
    self_address: Address,
    query_enode_cooldown: Duration,
    version_certificate_cooldown: Duration,
    last_query_enode_gossiped: Mutex<HashMap<Address, Instant>>,
    last_version_certificates_gossiped: Mutex<HashMap<Address, Instant>>,
}

impl GossipCooldownTracker {
    /// Create a tracker. `self_address` is the validator address whose
    /// traffic is never throttled.
    pub fn new(
        self_address: Address,
        query_enode_cooldown: Duration,
        version_certificate_cooldown: Duration,
    ) -> Self {
        Self {
            self_address,
            query_enode_cooldown,
            version_certificate_cooldown,
            last_query_enode_gossiped: Mutex::new(HashMap::new()),
            last_version_certificates_gossiped: Mutex::new(HashMap::new()),
        }
    }

    /// Check-and-stamp for a query-enode regossip from `source`.
    ///
    /// Returns false if a regossip from this source was recorded less than
    /// the cooldown ago; otherwise stamps the source and returns true. The
    /// check and the stamp happen under one lock, so concurrent handlers
    /// cannot both win the same window.
    pub fn try_regossip_query_enode(&self, source: Address) -> bool {
        Self::try_regossip(
            &self.last_query_enode_gossiped,
            source,
            self.self_address,
            self.query_enode_cooldown,
        )
    }

    /// Check-and-stamp for a version-certificate regossip from `source`.
    pub fn try_regossip_version_certificate(&self, source: Address) -> bool {
        Self::try_regossip(
            &self.last_version_certificates_gossiped,
            source,
            self.self_address,
            self.version_certificate_cooldown,
        )
    }

    fn try_regossip(
        map: &Mutex<HashMap<Address, Instant>>,
        source: Address,
        self_address: Address,
        cooldown: Duration,
    ) -> bool {
        let mut map = map.lock();
        if source != self_address {
            if let Some(last) = map.get(&source) {
                if last.elapsed() < cooldown {
                    return false;
                }
            }
        }
        map.insert(source, Instant::now());
        true
    }

    /// Drop entries whose address left the validator connection set and
    /// whose stamp is at least one cooldown old.
    pub fn prune(&self, conn_set: &ValidatorConnSet) {
        prune_map(
            &self.last_query_enode_gossiped,
            conn_set,
            self.query_enode_cooldown,
        );
        prune_map(
            &self.last_version_certificates_gossiped,
            conn_set,
            self.version_certificate_cooldown,
        );
    }

    /// Number of tracked sources (both maps), for prune assertions.
    pub fn tracked_sources(&self) -> usize {
        self.last_query_enode_gossiped.lock().len()
            + self.last_version_certificates_gossiped.lock().len()
    }
}

fn prune_map(
    map: &Mutex<HashMap<Address, Instant>>,
    conn_set: &ValidatorConnSet,
    cooldown: Duration,
) {
    map.lock()
        .retain(|address, stamp| conn_set.contains(address) || stamp.elapsed() < cooldown);
}

/// Bounded FIFO cache of message digests.
///
/// One instance records payloads this node already sent or regossiped
/// (self dedup); another records which payloads each peer is known to
/// have, keyed by peer-qualified digests.
pub struct RecentMessageCache {
    max_size: usize,
    entries: RwLock<CacheState>,
}

struct CacheState {
    seen: HashMap<[u8; 32], ()>,
    insertion_order: VecDeque<[u8; 32]>,
}

impl RecentMessageCache {
    /// Create a cache bounded to `max_size` digests.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            entries: RwLock::new(CacheState {
                seen: HashMap::with_capacity(max_size),
                insertion_order: VecDeque::with_capacity(max_size),
            }),
        }
    }

    /// Record a digest, evicting the oldest entry at capacity.
    pub fn mark(&self, key: [u8; 32]) {
        let mut state = self.entries.write();
        if state.seen.contains_key(&key) {
            return;
        }
        if state.seen.len() >= self.max_size {
            if let Some(oldest) = state.insertion_order.pop_front() {
                state.seen.remove(&oldest);
            }
        }
        state.seen.insert(key, ());
        state.insertion_order.push_back(key);
    }

    /// Whether a digest has been recorded.
    pub fn contains(&self, key: &[u8; 32]) -> bool {
        self.entries.read().seen.contains_key(key)
    }
}

/// Dedup key for a payload this node processed.
pub fn payload_hash(payload: &[u8]) -> [u8; 32] {
    keccak256(payload)
}

/// Dedup key for a payload a specific peer is known to have.
pub fn peer_payload_hash(peer: &Address, payload: &[u8]) -> [u8; 32] {
    keccak256_many(&[peer.as_slice(), payload])
}
