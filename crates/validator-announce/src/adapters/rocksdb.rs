//! # RocksDB Storage Adapter
//!
//! Production implementation of the [`KeyValueStore`] port backing the
//! val-enode and version-certificate tables.
//!
//! Both tables share one database; rows are namespaced by key prefix
//! (`ve:` / `vc:`), the same scheme the in-memory test store sees.

use crate::error::AnnounceError;
use crate::ports::outbound::{BatchOperation, KeyValueStore};
use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use std::path::Path;

/// RocksDB configuration for the announce tables.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Path to the database directory.
    pub path: String,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Enable fsync after each write.
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "./data/announce".to_string(),
            write_buffer_size: 16 * 1024 * 1024, // 16MB
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    /// Create config for testing (small buffers, no sync).
    pub fn for_testing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            write_buffer_size: 1024 * 1024, // 1MB
            sync_writes: false,
        }
    }
}

/// RocksDB-backed key-value store implementing the [`KeyValueStore`] port.
pub struct RocksDbStore {
    db: DB,
    config: RocksDbConfig,
}

impl RocksDbStore {
    /// Open or create a database.
    pub fn open(config: RocksDbConfig) -> Result<Self, AnnounceError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let db = DB::open(&opts, &config.path)
            .map_err(|e| AnnounceError::Storage(format!("Failed to open RocksDB: {e}")))?;

        Ok(Self { db, config })
    }

    /// Open at `path` with default options.
    pub fn open_default(path: impl AsRef<Path>) -> Result<Self, AnnounceError> {
        let config = RocksDbConfig {
            path: path.as_ref().to_string_lossy().to_string(),
            ..Default::default()
        };
        Self::open(config)
    }

    fn write_opts(&self) -> rocksdb::WriteOptions {
        let mut write_opts = rocksdb::WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }
}

impl KeyValueStore for RocksDbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, AnnounceError> {
        self.db
            .get(key)
            .map_err(|e| AnnounceError::Storage(format!("RocksDB get failed: {e}")))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), AnnounceError> {
        self.db
            .put_opt(key, value, &self.write_opts())
            .map_err(|e| AnnounceError::Storage(format!("RocksDB put failed: {e}")))
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), AnnounceError> {
        self.db
            .delete_opt(key, &self.write_opts())
            .map_err(|e| AnnounceError::Storage(format!("RocksDB delete failed: {e}")))
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), AnnounceError> {
        let mut batch = WriteBatch::default();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => batch.put(&key, &value),
                BatchOperation::Delete { key } => batch.delete(&key),
            }
        }

        self.db
            .write_opt(batch, &self.write_opts())
            .map_err(|e| AnnounceError::Storage(format!("RocksDB batch write failed: {e}")))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, AnnounceError> {
        let mut results = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, rocksdb::Direction::Forward));

        for item in iter {
            let (key, value) =
                item.map_err(|e| AnnounceError::Storage(format!("RocksDB scan failed: {e}")))?;
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_vec(), value.to_vec()));
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> RocksDbStore {
        let config = RocksDbConfig::for_testing(dir.path().to_string_lossy().to_string());
        RocksDbStore::open(config).unwrap()
    }

    #[test]
    fn test_basic_operations() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.put(b"key1", b"value1").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));

        store.delete(b"key1").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), None);
    }

    #[test]
    fn test_batch_write() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        store.put(b"stale", b"x").unwrap();

        store
            .atomic_batch_write(vec![
                BatchOperation::put(b"a".to_vec(), b"1".to_vec()),
                BatchOperation::put(b"b".to_vec(), b"2".to_vec()),
                BatchOperation::delete(b"stale".to_vec()),
            ])
            .unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"stale").unwrap(), None);
    }

    #[test]
    fn test_prefix_scan_stays_in_namespace() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.put(b"ve:0001", b"1").unwrap();
        store.put(b"ve:0002", b"2").unwrap();
        store.put(b"vc:0001", b"3").unwrap();

        let rows = store.prefix_scan(b"ve:").unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open_store(&dir);
            store.put(b"persisted", b"yes").unwrap();
        }
        let store = open_store(&dir);
        assert_eq!(store.get(b"persisted").unwrap(), Some(b"yes".to_vec()));
    }
}
