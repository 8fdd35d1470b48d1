//! Inbound port (driving): the surface the transport and consensus engine
//! call on the announce subsystem.

use crate::domain::entries::AddressEntry;
use crate::domain::enode::EnodeUrl;
use crate::domain::message::Message;
use crate::error::AnnounceError;
use crate::ports::outbound::AnnouncePeer;
use crate::tables::val_enode::VersionAndEnodeUpdate;
use shared_types::{Address, NodeId, Version};
use std::collections::HashMap;

/// The announce subsystem API.
///
/// Handler methods are called concurrently from transport-owned tasks;
/// implementations synchronize internally.
pub trait AnnounceApi: Send + Sync {
    /// Handle a gossiped query-enode message from `peer_address`.
    fn handle_query_enode(
        &self,
        peer_address: Address,
        payload: &[u8],
    ) -> Result<(), AnnounceError>;

    /// Handle a gossiped version-certificates message from `peer_address`.
    fn handle_version_certificates(
        &self,
        peer_address: Address,
        payload: &[u8],
    ) -> Result<(), AnnounceError>;

    /// Handle a directly received enode-certificate message.
    fn handle_enode_certificate(&self, payload: &[u8]) -> Result<(), AnnounceError>;

    /// Request an announce-version bump. Non-blocking: requests coalesce
    /// into at most one pending bump executed by the control loop.
    fn update_announce_version(&self);

    /// The current announce version.
    fn announce_version(&self) -> Version;

    /// The current enode certificate messages, keyed by external node id.
    /// Empty until the first version bump installs certificates.
    fn enode_certificate_msg_map(&self) -> HashMap<NodeId, Message>;

    /// Atomically replace the enode certificate map. All messages must
    /// share one inner version; an older or equal version is a no-op.
    fn set_enode_certificate_msg_map(
        &self,
        map: HashMap<NodeId, Message>,
    ) -> Result<(), AnnounceError>;

    /// The version of the installed enode certificate map.
    fn enode_certificate_msg_version(&self) -> Version;

    /// Push the entire version certificate table to one peer (used when a
    /// new peer registers).
    fn send_version_certificate_table(
        &self,
        peer: &dyn AnnouncePeer,
    ) -> Result<(), AnnounceError>;

    /// Build and sign an enode certificate message for the given URL at
    /// the current announce version (proxy handshake path).
    fn generate_enode_certificate_msg(
        &self,
        enode_url: &EnodeUrl,
    ) -> Result<Message, AnnounceError>;

    /// Read val-enode entries; all entries when `addresses` is `None`.
    fn val_enode_entries(
        &self,
        addresses: Option<&[Address]>,
    ) -> Result<HashMap<Address, AddressEntry>, AnnounceError>;

    /// Replace the val-enode table content with the given entries: prune
    /// every other address, then upsert (proxy val-enode-share path).
    fn rewrite_val_enode_entries(
        &self,
        entries: Vec<VersionAndEnodeUpdate>,
    ) -> Result<(), AnnounceError>;
}
