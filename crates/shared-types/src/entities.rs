//! # Core Identity Entities
//!
//! The primitive identity types of the announce protocol.
//!
//! ## Clusters
//!
//! - **Validator identity**: `Address`, `ValidatorConnSet`
//! - **Network identity**: `NodeId`
//! - **Freshness**: `Version`

use std::collections::HashSet;

/// A 20-byte validator address.
///
/// Derived from an ECDSA public key as the low 20 bytes of the Keccak-256
/// digest of the uncompressed key body.
pub type Address = [u8; 20];

/// A 32-byte network node identifier.
///
/// The Keccak-256 digest of a node's 64-byte uncompressed public key body.
pub type NodeId = [u8; 32];

/// An announce version: seconds since the Unix epoch, truncated to 32 bits.
///
/// Monotonically non-decreasing per source validator. The 32-bit wire form
/// wraps in 2106; both ends of the wire must agree on the width, so any
/// widening requires an envelope revision.
pub type Version = u32;

/// The set of validator addresses that are currently registered or elected
/// and should therefore be interconnected.
pub type ValidatorConnSet = HashSet<Address>;

/// Render an address as `0x`-prefixed hex for log fields.
pub fn fmt_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}

/// Render a node id as `0x`-prefixed hex for log fields.
pub fn fmt_node_id(node_id: &NodeId) -> String {
    format!("0x{}", hex::encode(node_id))
}
