//! The announce control loop.
//!
//! One cooperative task multiplexing over:
//!
//! 1. the should-announce check (every 5 s)
//! 2. the full version-certificate-table share (every 5 min)
//! 3. the prune tick (every 10 min)
//! 4. the update-version tick (every 5 min while announcing)
//! 5. the adaptive query-enode tick (while announcing)
//! 6. coalesced query-enode publication requests
//! 7. coalesced update-version requests
//! 8. the shutdown signal
//!
//! Every error inside a branch is logged and the loop continues; only the
//! shutdown signal ends it.

use crate::service::AnnounceService;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{trace, warn};

/// How aggressively the loop publishes query-enode messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueryEnodeFrequencyState {
    /// Publish every minute until the first peer of any purpose connects.
    /// A freshly enabled node may sit in a partition of the gossip
    /// network; frequent queries shorten the blind window.
    HighFreqBeforeFirstPeer,
    /// Keep the one-minute cadence for a bounded number of emissions after
    /// the first peer, giving a partitioned neighborhood time to join the
    /// broader network.
    HighFreqAfterFirstPeer,
    /// Publish on the configured low-frequency period.
    LowFreq,
}

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Await the next tick of an optional ticker; pends forever when absent so
/// the select branch stays quiet.
async fn maybe_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl AnnounceService {
    /// Run the announce control loop until `shutdown` fires.
    ///
    /// Panics if called twice on the same service: the coalescing request
    /// channels have a single receiver end.
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) {
        let channels = self
            .take_loop_channels()
            .expect("announce control loop started twice");
        let mut query_request_rx = channels.query_enode_request_rx;
        let mut update_request_rx = channels.update_version_rx;

        let mut check_ticker = ticker(self.config.should_announce_check_interval);
        let mut share_ticker = ticker(self.config.version_certificate_share_interval);
        let mut prune_ticker = ticker(self.config.prune_interval);

        let mut query_ticker: Option<Interval> = None;
        let mut update_version_ticker: Option<Interval> = None;

        let mut announcing = false;
        let mut should_announce = false;
        let mut frequency_state = QueryEnodeFrequencyState::LowFreq;
        let mut current_query_period = self.config.query_enode_gossip_period;
        let mut high_freq_emissions_after_first_peer: u32 = 0;

        loop {
            tokio::select! {
                _ = check_ticker.tick() => {
                    trace!("Checking if this node should announce its enode");
                    match self.should_save_and_publish() {
                        Ok(result) => should_announce = result,
                        Err(error) => {
                            warn!(%error, "Error checking if this node should announce");
                            continue;
                        }
                    }

                    if should_announce && !announcing {
                        self.update_announce_version_now();

                        // Delay the first publication so receivers have a
                        // fresher cached connection set by the time the
                        // query arrives.
                        let delay = self.config.first_publication_delay();
                        let request_tx = self.query_enode_request_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = request_tx.try_send(());
                        });

                        if self.config.aggressive_query_enode_gossip_on_enablement {
                            frequency_state = QueryEnodeFrequencyState::HighFreqBeforeFirstPeer;
                            current_query_period = self.config.high_frequency_period;
                            high_freq_emissions_after_first_peer = 0;
                        } else {
                            frequency_state = QueryEnodeFrequencyState::LowFreq;
                            current_query_period = self.config.query_enode_gossip_period;
                        }

                        query_ticker = Some(ticker(current_query_period));
                        update_version_ticker =
                            Some(ticker(self.config.update_announce_version_interval));
                        announcing = true;
                        trace!("Enabled periodic gossiping of announce messages");
                    } else if !should_announce && announcing {
                        query_ticker = None;
                        update_version_ticker = None;
                        announcing = false;
                        trace!("Disabled periodic gossiping of announce messages");
                    }
                }

                _ = share_ticker.tick() => {
                    // Receivers only regossip entries new to them, so the
                    // periodic full share converges without amplification.
                    if let Err(error) = self.share_all_version_certificates() {
                        warn!(%error, "Error gossiping all version certificates");
                    }
                }

                _ = prune_ticker.tick() => {
                    if let Err(error) = self.prune_announce_data_structures() {
                        warn!(%error, "Error pruning announce data structures");
                    }
                }

                _ = maybe_tick(update_version_ticker.as_mut()), if update_version_ticker.is_some() => {
                    self.update_announce_version_now();
                }

                _ = maybe_tick(query_ticker.as_mut()), if query_ticker.is_some() => {
                    self.request_query_enode_publication();
                }

                Some(()) = query_request_rx.recv() => {
                    if !should_announce {
                        continue;
                    }
                    match frequency_state {
                        QueryEnodeFrequencyState::HighFreqBeforeFirstPeer => {
                            if !self
                                .network
                                .find_peers(None, crate::ports::outbound::PeerPurpose::Any)
                                .is_empty()
                            {
                                frequency_state = QueryEnodeFrequencyState::HighFreqAfterFirstPeer;
                            }
                        }
                        QueryEnodeFrequencyState::HighFreqAfterFirstPeer => {
                            if high_freq_emissions_after_first_peer
                                >= self.config.high_frequency_emissions_after_first_peer
                            {
                                frequency_state = QueryEnodeFrequencyState::LowFreq;
                            }
                            high_freq_emissions_after_first_peer += 1;
                        }
                        QueryEnodeFrequencyState::LowFreq => {
                            // Retune the ticker when the configured period
                            // changed since it was built.
                            if current_query_period != self.config.query_enode_gossip_period {
                                current_query_period = self.config.query_enode_gossip_period;
                                query_ticker = Some(ticker(current_query_period));
                            }
                        }
                    }

                    // Even when inside another node's cooldown window the
                    // message still reaches direct peers, which matters
                    // most while the network is starting up.
                    if let Err(error) = self.generate_and_gossip_query_enode(
                        self.announce_version_inner(),
                        frequency_state == QueryEnodeFrequencyState::LowFreq,
                    ) {
                        warn!(%error, "Error generating and gossiping query-enode");
                    }
                }

                Some(()) = update_request_rx.recv() => {
                    // One bump serves every pending request.
                    while update_request_rx.try_recv().is_ok() {}
                    self.update_announce_version_now();
                }

                _ = &mut shutdown => {
                    trace!("Announce control loop shutting down");
                    return;
                }
            }
        }
    }
}
