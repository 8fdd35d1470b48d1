//! Announce subsystem configuration.

use std::time::Duration;

/// Configuration for the announce control loop and gossip coordinator.
#[derive(Clone, Debug)]
pub struct AnnounceConfig {
    /// Consensus epoch length in blocks. Short epochs (≤ 10) shrink the
    /// first-publication delay so small test networks converge quickly.
    pub epoch: u64,
    /// Query-enode gossip period in the low-frequency state. Re-read on
    /// every low-frequency tick, so runtime changes retune the ticker.
    pub query_enode_gossip_period: Duration,
    /// Start in the high-frequency state when announcing is enabled.
    pub aggressive_query_enode_gossip_on_enablement: bool,
    /// How often to re-evaluate whether this node should be announcing.
    pub should_announce_check_interval: Duration,
    /// How often to share the full version certificate table with peers.
    pub version_certificate_share_interval: Duration,
    /// How often to prune announce data structures against the conn set.
    pub prune_interval: Duration,
    /// How often to advance the announce version while announcing.
    pub update_announce_version_interval: Duration,
    /// Query-enode period in both high-frequency states.
    pub high_frequency_period: Duration,
    /// Emissions in the high-frequency-after-first-peer state before
    /// dropping to low frequency.
    pub high_frequency_emissions_after_first_peer: u32,
    /// Per-source cooldown for regossiping query-enode messages.
    pub query_enode_gossip_cooldown: Duration,
    /// Per-source cooldown for regossiping version certificates.
    pub version_certificate_gossip_cooldown: Duration,
    /// Bound on the self/peer recent-message dedup caches.
    pub recent_message_cache_size: usize,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            epoch: 17_280,
            query_enode_gossip_period: Duration::from_secs(300),
            aggressive_query_enode_gossip_on_enablement: true,
            should_announce_check_interval: Duration::from_secs(5),
            version_certificate_share_interval: Duration::from_secs(5 * 60),
            prune_interval: Duration::from_secs(10 * 60),
            update_announce_version_interval: Duration::from_secs(5 * 60),
            high_frequency_period: Duration::from_secs(60),
            high_frequency_emissions_after_first_peer: 10,
            query_enode_gossip_cooldown: Duration::from_secs(5 * 60),
            version_certificate_gossip_cooldown: Duration::from_secs(5 * 60),
            recent_message_cache_size: 10_000,
        }
    }
}

impl AnnounceConfig {
    /// Delay between announcing being enabled and the first query-enode
    /// publication. The delay lets receivers refresh their cached
    /// connection set before the message arrives.
    pub fn first_publication_delay(&self) -> Duration {
        if self.epoch <= 10 {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(60)
        }
    }

    /// Config for tests: tiny caches, short epoch.
    pub fn for_testing() -> Self {
        Self {
            epoch: 10,
            recent_message_cache_size: 64,
            ..Default::default()
        }
    }
}
