//! The announce service: tables, gossip bookkeeping and the control loop
//! behind one injected context value.

mod control;
mod handlers;
mod publish;

#[cfg(test)]
mod tests;

use crate::domain::config::AnnounceConfig;
use crate::domain::enode_certificate::EnodeCertificate;
use crate::domain::gossip::{GossipCooldownTracker, RecentMessageCache};
use crate::domain::message::Message;
use crate::error::AnnounceError;
use crate::ports::outbound::{
    GossipNetwork, KeyValueStore, NodeIdentity, ProxyEngine, ValidatorDirectory,
};
use crate::tables::{ValEnodeTable, VersionCertificateTable};
use parking_lot::{Mutex, RwLock};
use shared_types::{NodeId, Version};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The installed enode certificate messages and their common version,
/// guarded together so readers never observe a half-replaced map.
struct EnodeCertState {
    map: HashMap<NodeId, Message>,
    version: Version,
}

/// Receiver ends of the coalescing request channels; taken once by
/// [`AnnounceService::run`].
struct LoopChannels {
    query_enode_request_rx: mpsc::Receiver<()>,
    update_version_rx: mpsc::Receiver<()>,
}

/// The announce subsystem core.
///
/// Owns the durable tables, the gossip cooldown maps, the dedup caches,
/// the announce version and the enode certificate map. Inbound handlers
/// run on transport tasks concurrently with the control loop; every piece
/// of shared state synchronizes internally.
pub struct AnnounceService {
    pub(crate) config: AnnounceConfig,
    pub(crate) network: Arc<dyn GossipNetwork>,
    pub(crate) directory: Arc<dyn ValidatorDirectory>,
    pub(crate) identity: Arc<dyn NodeIdentity>,
    pub(crate) proxy: Option<Arc<dyn ProxyEngine>>,
    pub(crate) val_enode_table: ValEnodeTable,
    pub(crate) version_certificate_table: VersionCertificateTable,
    pub(crate) cooldowns: GossipCooldownTracker,
    pub(crate) self_recent_messages: RecentMessageCache,
    pub(crate) peer_recent_messages: RecentMessageCache,
    announce_version: RwLock<Version>,
    enode_certificates: Mutex<EnodeCertState>,
    query_enode_request_tx: mpsc::Sender<()>,
    update_version_tx: mpsc::Sender<()>,
    loop_channels: Mutex<Option<LoopChannels>>,
}

impl AnnounceService {
    /// Wire up a service over its ports and table backing stores. `proxy`
    /// is `Some` exactly when this node is a proxied validator.
    pub fn new(
        config: AnnounceConfig,
        network: Arc<dyn GossipNetwork>,
        directory: Arc<dyn ValidatorDirectory>,
        identity: Arc<dyn NodeIdentity>,
        proxy: Option<Arc<dyn ProxyEngine>>,
        val_enode_store: Box<dyn KeyValueStore>,
        version_certificate_store: Box<dyn KeyValueStore>,
    ) -> Self {
        // Both request channels hold at most one pending item; senders
        // drop on full, the loop drains on receive.
        let (query_enode_request_tx, query_enode_request_rx) = mpsc::channel(1);
        let (update_version_tx, update_version_rx) = mpsc::channel(1);

        let cooldowns = GossipCooldownTracker::new(
            identity.validator_address(),
            config.query_enode_gossip_cooldown,
            config.version_certificate_gossip_cooldown,
        );

        Self {
            cooldowns,
            self_recent_messages: RecentMessageCache::new(config.recent_message_cache_size),
            peer_recent_messages: RecentMessageCache::new(config.recent_message_cache_size),
            val_enode_table: ValEnodeTable::new(val_enode_store),
            version_certificate_table: VersionCertificateTable::new(version_certificate_store),
            announce_version: RwLock::new(0),
            enode_certificates: Mutex::new(EnodeCertState {
                map: HashMap::new(),
                version: 0,
            }),
            query_enode_request_tx,
            update_version_tx,
            loop_channels: Mutex::new(Some(LoopChannels {
                query_enode_request_rx,
                update_version_rx,
            })),
            config,
            network,
            directory,
            identity,
            proxy,
        }
    }

    /// Whether this node is currently in the validator connection set and
    /// should therefore save plaintext enodes and publish its own.
    pub(crate) fn should_save_and_publish(&self) -> Result<bool, AnnounceError> {
        let conn_set = self.directory.validator_conn_set()?;
        Ok(conn_set.contains(&self.identity.address()))
    }

    /// The current announce version (shared read).
    pub(crate) fn announce_version_inner(&self) -> Version {
        *self.announce_version.read()
    }

    /// Store a freshly shared announce version. The control loop is the
    /// sole caller.
    pub(crate) fn store_announce_version(&self, version: Version) {
        *self.announce_version.write() = version;
    }

    /// Enqueue a query-enode publication request, dropping if one is
    /// already pending.
    pub(crate) fn request_query_enode_publication(&self) {
        let _ = self.query_enode_request_tx.try_send(());
    }

    /// Enqueue an announce-version bump request, dropping if one is
    /// already pending.
    pub(crate) fn request_version_update(&self) {
        let _ = self.update_version_tx.try_send(());
    }

    fn take_loop_channels(&self) -> Option<LoopChannels> {
        self.loop_channels.lock().take()
    }

    /// Snapshot of the installed enode certificate messages.
    pub(crate) fn enode_certificate_msg_map_inner(&self) -> HashMap<NodeId, Message> {
        self.enode_certificates.lock().map.clone()
    }

    /// The version shared by the installed enode certificate messages.
    pub(crate) fn enode_certificate_msg_version_inner(&self) -> Version {
        self.enode_certificates.lock().version
    }

    /// Compare-and-swap the enode certificate map.
    ///
    /// Every message must decode to an enode certificate, and all inner
    /// versions must agree; otherwise the call fails without touching the
    /// installed map. A common version at or below the installed one is a
    /// logged no-op.
    pub(crate) fn set_enode_certificate_msg_map_inner(
        &self,
        map: HashMap<NodeId, Message>,
    ) -> Result<(), AnnounceError> {
        let mut common_version: Option<Version> = None;
        for msg in map.values() {
            let certificate = EnodeCertificate::from_bytes(&msg.msg)?;
            match common_version {
                None => common_version = Some(certificate.version),
                Some(version) if version != certificate.version => {
                    return Err(AnnounceError::InvalidCertificateMap);
                }
                Some(_) => {}
            }
        }
        let Some(version) = common_version else {
            return Err(AnnounceError::InvalidCertificateMap);
        };

        let mut state = self.enode_certificates.lock();
        if version <= state.version {
            tracing::debug!(
                installed = state.version,
                offered = version,
                "Ignoring enode certificate map at an older or equal version"
            );
            return Ok(());
        }
        state.map = map;
        state.version = version;
        Ok(())
    }
}
