//! Val-enode table: validator address → endpoint knowledge.

use crate::domain::entries::AddressEntry;
use crate::domain::enode::EnodeUrl;
use crate::error::AnnounceError;
use crate::ports::outbound::{BatchOperation, KeyValueStore};
use parking_lot::RwLock;
use shared_crypto::PublicKeyBytes;
use shared_types::{Address, ValidatorConnSet, Version};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

const ROW_PREFIX: &[u8] = b"ve:";

/// Input for [`ValEnodeTable::upsert_version_and_enode`].
#[derive(Clone, Debug)]
pub struct VersionAndEnodeUpdate {
    /// The validator the enode belongs to.
    pub address: Address,
    /// The learned enode URL.
    pub node: EnodeUrl,
    /// The version the enode was learned at.
    pub version: Version,
}

/// Input for [`ValEnodeTable::upsert_highest_known_version`].
#[derive(Clone, Debug)]
pub struct HighestKnownVersionUpdate {
    /// The validator the version certificate came from.
    pub address: Address,
    /// The signer's public key, stored for future query encryption.
    pub public_key: PublicKeyBytes,
    /// The certified version.
    pub highest_known_version: Version,
}

/// Durable map from validator address to [`AddressEntry`].
///
/// The table owns its synchronization: every operation takes the store
/// lock for its full read-modify-write, so per-key upserts are atomic.
pub struct ValEnodeTable {
    store: RwLock<Box<dyn KeyValueStore>>,
}

impl ValEnodeTable {
    /// Create a table over the given backing store.
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self {
            store: RwLock::new(store),
        }
    }

    /// Fetch entries for the given addresses, or every entry when
    /// `addresses` is `None`. Missing addresses are simply absent from the
    /// result.
    pub fn get_val_enodes(
        &self,
        addresses: Option<&[Address]>,
    ) -> Result<HashMap<Address, AddressEntry>, AnnounceError> {
        let store = self.store.read();
        let mut entries = HashMap::new();
        match addresses {
            Some(addresses) => {
                for address in addresses {
                    if let Some(bytes) = store.get(&row_key(address))? {
                        entries.insert(*address, decode_row(&bytes)?);
                    }
                }
            }
            None => {
                for (_, bytes) in store.prefix_scan(ROW_PREFIX)? {
                    let entry = decode_row(&bytes)?;
                    entries.insert(entry.address, entry);
                }
            }
        }
        Ok(entries)
    }

    /// Apply `{address, node, version}` updates.
    ///
    /// Per entry: if the incoming version is at least the stored one, the
    /// node and version are replaced; the highest known version is raised
    /// to at least the incoming version, and raising it resets the
    /// query-attempt stats.
    pub fn upsert_version_and_enode(
        &self,
        updates: Vec<VersionAndEnodeUpdate>,
    ) -> Result<(), AnnounceError> {
        let mut store = self.store.write();
        let mut batch = Vec::new();

        for update in updates {
            let mut entry = load_or_new(store.as_ref(), &update.address)?;
            let mut changed = false;

            if update.version >= entry.version {
                entry.node = Some(update.node);
                entry.version = update.version;
                changed = true;
            }
            if update.version > entry.highest_known_version {
                entry.highest_known_version = update.version;
                entry.num_query_attempts_for_hk_version = 0;
                entry.last_query_timestamp = None;
                changed = true;
            }

            if changed {
                batch.push(BatchOperation::put(row_key(&update.address), encode_row(&entry)?));
            }
        }

        if batch.is_empty() {
            return Ok(());
        }
        store.atomic_batch_write(batch)
    }

    /// Apply `{address, public_key, highest_known_version}` updates.
    ///
    /// The highest known version only moves strictly upward (advancing it
    /// resets query-attempt stats); the public key is set when absent.
    /// Replaying a batch is a no-op.
    pub fn upsert_highest_known_version(
        &self,
        updates: Vec<HighestKnownVersionUpdate>,
    ) -> Result<(), AnnounceError> {
        let mut store = self.store.write();
        let mut batch = Vec::new();

        for update in updates {
            let mut entry = load_or_new(store.as_ref(), &update.address)?;
            let mut changed = false;

            if update.highest_known_version > entry.highest_known_version {
                entry.highest_known_version = update.highest_known_version;
                entry.num_query_attempts_for_hk_version = 0;
                entry.last_query_timestamp = None;
                changed = true;
            }
            if entry.public_key.is_none() {
                entry.public_key = Some(update.public_key);
                changed = true;
            }

            if changed {
                batch.push(BatchOperation::put(row_key(&update.address), encode_row(&entry)?));
            }
        }

        if batch.is_empty() {
            return Ok(());
        }
        store.atomic_batch_write(batch)
    }

    /// Record a query attempt against each address: bump the attempt count
    /// and stamp the wall clock. Unknown addresses are skipped.
    pub fn update_query_enode_stats(&self, addresses: &[Address]) -> Result<(), AnnounceError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut store = self.store.write();
        let mut batch = Vec::new();

        for address in addresses {
            let Some(bytes) = store.get(&row_key(address))? else {
                continue;
            };
            let mut entry = decode_row(&bytes)?;
            entry.num_query_attempts_for_hk_version += 1;
            entry.last_query_timestamp = Some(now);
            batch.push(BatchOperation::put(row_key(address), encode_row(&entry)?));
        }

        if batch.is_empty() {
            return Ok(());
        }
        store.atomic_batch_write(batch)
    }

    /// Drop rows whose address is not in `keep`.
    pub fn prune_entries(&self, keep: &ValidatorConnSet) -> Result<(), AnnounceError> {
        let mut store = self.store.write();
        let mut batch = Vec::new();

        for (key, bytes) in store.prefix_scan(ROW_PREFIX)? {
            let entry = decode_row(&bytes)?;
            if !keep.contains(&entry.address) {
                batch.push(BatchOperation::delete(key));
            }
        }

        if batch.is_empty() {
            return Ok(());
        }
        store.atomic_batch_write(batch)
    }
}

fn row_key(address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(ROW_PREFIX.len() + address.len());
    key.extend_from_slice(ROW_PREFIX);
    key.extend_from_slice(address);
    key
}

fn load_or_new(
    store: &dyn KeyValueStore,
    address: &Address,
) -> Result<AddressEntry, AnnounceError> {
    match store.get(&row_key(address))? {
        Some(bytes) => decode_row(&bytes),
        None => Ok(AddressEntry::new(*address)),
    }
}

fn encode_row(entry: &AddressEntry) -> Result<Vec<u8>, AnnounceError> {
    bincode::serialize(entry).map_err(|e| AnnounceError::Storage(e.to_string()))
}

fn decode_row(bytes: &[u8]) -> Result<AddressEntry, AnnounceError> {
    bincode::deserialize(bytes).map_err(|e| AnnounceError::Storage(e.to_string()))
}
