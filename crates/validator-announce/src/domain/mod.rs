//! Domain layer: wire messages, table entries, gossip bookkeeping.

pub mod config;
pub mod enode;
pub mod enode_certificate;
pub mod entries;
pub mod gossip;
pub mod message;
pub mod query_enode;
pub mod version_certificate;

pub use config::AnnounceConfig;
pub use enode::EnodeUrl;
pub use entries::{unix_now, AddressEntry};
pub use enode_certificate::EnodeCertificate;
pub use gossip::{GossipCooldownTracker, RecentMessageCache};
pub use message::{
    Message, ENODE_CERTIFICATE_MSG, QUERY_ENODE_MSG, VERSION_CERTIFICATES_MSG,
};
pub use query_enode::{validate_query_enode, EncryptedEnodeUrl, QueryEnodeData};
pub use version_certificate::VersionCertificate;
