//! Outbound ports (driven): transport, consensus surface, identity, proxy
//! topology and the table backing store.

use crate::domain::enode::EnodeUrl;
use crate::error::AnnounceError;
use parking_lot::RwLock;
use shared_crypto::{CryptoError, PublicKeyBytes, RecoverableSignature};
use shared_types::{Address, NodeId, ValidatorConnSet};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// What a peer connection is for, when filtering peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerPurpose {
    /// Peers established for validator-to-validator traffic.
    Validator,
    /// Any connected peer, regardless of purpose.
    Any,
}

/// A live peer connection capable of receiving direct messages.
pub trait AnnouncePeer: Send + Sync {
    /// The peer's node identifier.
    fn node_id(&self) -> NodeId;

    /// Send a message directly to this peer.
    fn send(&self, code: u8, payload: &[u8]) -> Result<(), AnnounceError>;
}

/// P2P transport surface consumed by the announce subsystem.
pub trait GossipNetwork: Send + Sync {
    /// Gossip a payload to all peers.
    fn gossip(&self, payload: &[u8], code: u8) -> Result<(), AnnounceError>;

    /// Send a payload to the peers backing the given validator addresses.
    fn multicast(
        &self,
        dest_addresses: &[Address],
        payload: &[u8],
        code: u8,
        send_to_self: bool,
    ) -> Result<(), AnnounceError>;

    /// Look up connected peers, optionally restricted to the given node
    /// ids, filtered by purpose.
    fn find_peers(
        &self,
        node_ids: Option<&HashSet<NodeId>>,
        purpose: PeerPurpose,
    ) -> HashMap<NodeId, Arc<dyn AnnouncePeer>>;

    /// This node's own externally reachable enode URL.
    fn self_node(&self) -> EnodeUrl;
}

/// Consensus-engine surface: who should currently be interconnected.
pub trait ValidatorDirectory: Send + Sync {
    /// The current validator connection set.
    fn validator_conn_set(&self) -> Result<ValidatorConnSet, AnnounceError>;
}

/// Key custody and identity surface.
///
/// For a standalone validator `address` and `validator_address` coincide;
/// on a proxy node `validator_address` is the proxied validator's address.
pub trait NodeIdentity: Send + Sync {
    /// This node's own address.
    fn address(&self) -> Address;

    /// The validator address this node announces for.
    fn validator_address(&self) -> Address;

    /// The uncompressed public key body matching `address`.
    fn public_key(&self) -> PublicKeyBytes;

    /// Sign a 32-byte prehash with the node key.
    fn sign(&self, prehash: &[u8; 32]) -> Result<RecoverableSignature, CryptoError>;

    /// ECIES-decrypt a ciphertext addressed to this node.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Proxy topology surface, consumed only by proxied validators.
pub trait ProxyEngine: Send + Sync {
    /// Which proxy fronts each remote validator.
    fn validator_proxy_assignments(&self) -> Result<HashMap<Address, EnodeUrl>, AnnounceError>;

    /// External enodes of all currently peered proxies.
    fn proxy_external_nodes(&self) -> Result<Vec<EnodeUrl>, AnnounceError>;

    /// Forward per-proxy payloads to the proxies for delivery to the given
    /// destination validators.
    fn send_forward_msg(
        &self,
        dest_addresses: &[Address],
        code: u8,
        proxy_specific_payloads: HashMap<NodeId, Vec<u8>>,
    ) -> Result<(), AnnounceError>;

    /// Push the current val-enode table to all proxies.
    fn share_val_enodes_with_proxies(&self) -> Result<(), AnnounceError>;
}

/// Abstract interface for the durable table backing store.
///
/// Production: `RocksDbStore` (adapters). Testing: [`InMemoryKVStore`].
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, AnnounceError>;

    /// Put a single key-value pair.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), AnnounceError>;

    /// Delete a key.
    fn delete(&mut self, key: &[u8]) -> Result<(), AnnounceError>;

    /// Execute an atomic batch write: all operations apply or none do.
    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), AnnounceError>;

    /// Iterate over key-value pairs whose key starts with `prefix`.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, AnnounceError>;
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put {
        /// Row key.
        key: Vec<u8>,
        /// Row value.
        value: Vec<u8>,
    },
    /// Delete a key.
    Delete {
        /// Row key.
        key: Vec<u8>,
    },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

/// In-memory key-value store for tests.
#[derive(Default)]
pub struct InMemoryKVStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryKVStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, AnnounceError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), AnnounceError> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), AnnounceError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), AnnounceError> {
        let mut data = self.data.write();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, AnnounceError> {
        Ok(self
            .data
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}
