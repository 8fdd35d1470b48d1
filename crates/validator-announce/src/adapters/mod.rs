//! Adapters: production implementations of the outbound ports.

pub mod rocksdb;

pub use self::rocksdb::{RocksDbConfig, RocksDbStore};
