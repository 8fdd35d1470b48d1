//! # Shared Types
//!
//! Identity types used by every crate in the workspace: validator
//! addresses, node identifiers and the announce version counter.
//!
//! All address fields use `[u8; 20]`; all node identifiers use `[u8; 32]`.

pub mod entities;

pub use entities::{
    fmt_address, fmt_node_id, Address, NodeId, ValidatorConnSet, Version,
};
