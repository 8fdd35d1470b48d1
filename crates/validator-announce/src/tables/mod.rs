//! Durable announce tables over the key-value backing store.

pub mod val_enode;
pub mod version_certificate;

pub use val_enode::{HighestKnownVersionUpdate, ValEnodeTable, VersionAndEnodeUpdate};
pub use version_certificate::VersionCertificateTable;
