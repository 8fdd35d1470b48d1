//! Ports: the interfaces the announce subsystem exposes (inbound) and the
//! interfaces it requires the host node to implement (outbound).

pub mod inbound;
pub mod outbound;

pub use inbound::AnnounceApi;
pub use outbound::{
    AnnouncePeer, BatchOperation, GossipNetwork, InMemoryKVStore, KeyValueStore, NodeIdentity,
    PeerPurpose, ProxyEngine, ValidatorDirectory,
};
