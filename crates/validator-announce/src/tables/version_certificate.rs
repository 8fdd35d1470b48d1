//! Version certificate table: validator address → freshest signed version.

use crate::domain::version_certificate::VersionCertificate;
use crate::error::AnnounceError;
use crate::ports::outbound::{BatchOperation, KeyValueStore};
use parking_lot::RwLock;
use shared_types::{Address, ValidatorConnSet};

const ROW_PREFIX: &[u8] = b"vc:";

/// Durable map from validator address to the version certificate with the
/// largest version seen for that address. Ties keep the earliest-seen
/// certificate.
pub struct VersionCertificateTable {
    store: RwLock<Box<dyn KeyValueStore>>,
}

impl VersionCertificateTable {
    /// Create a table over the given backing store.
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self {
            store: RwLock::new(store),
        }
    }

    /// All stored certificates.
    pub fn get_all(&self) -> Result<Vec<VersionCertificate>, AnnounceError> {
        let store = self.store.read();
        store
            .prefix_scan(ROW_PREFIX)?
            .into_iter()
            .map(|(_, bytes)| decode_row(&bytes))
            .collect()
    }

    /// The stored certificate for one address, if any.
    pub fn get(&self, address: &Address) -> Result<Option<VersionCertificate>, AnnounceError> {
        let store = self.store.read();
        store
            .get(&row_key(address))?
            .map(|bytes| decode_row(&bytes))
            .transpose()
    }

    /// Insert certificates that strictly advance the stored version for
    /// their address; everything else is dropped silently. Returns the
    /// certificates that were actually inserted.
    pub fn upsert(
        &self,
        entries: Vec<VersionCertificate>,
    ) -> Result<Vec<VersionCertificate>, AnnounceError> {
        let mut store = self.store.write();
        let mut batch = Vec::new();
        let mut inserted = Vec::new();

        for entry in entries {
            let stored_version = match store.get(&row_key(&entry.address))? {
                Some(bytes) => Some(decode_row(&bytes)?.version),
                None => None,
            };
            if let Some(stored_version) = stored_version {
                if entry.version <= stored_version {
                    continue;
                }
            }
            batch.push(BatchOperation::put(
                row_key(&entry.address),
                encode_row(&entry)?,
            ));
            inserted.push(entry);
        }

        if !batch.is_empty() {
            store.atomic_batch_write(batch)?;
        }
        Ok(inserted)
    }

    /// Drop rows whose address is not in `keep`.
    pub fn prune(&self, keep: &ValidatorConnSet) -> Result<(), AnnounceError> {
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

fn encode_row(entry: &VersionCertificate) -> Result<Vec<u8>, AnnounceError> {
    bincode::serialize(entry).map_err(|e| AnnounceError::Storage(e.to_string()))
}

fn decode_row(bytes: &[u8]) -> Result<VersionCertificate, AnnounceError> {
    bincode::deserialize(bytes).map_err(|e| AnnounceError::Storage(e.to_string()))
}
