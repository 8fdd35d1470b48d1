//! Enode URL value object.
//!
//! An enode URL binds a node's uncompressed secp256k1 public key to a
//! reachable TCP endpoint: `enode://<128 hex chars>@<host>:<port>`.

use crate::error::AnnounceError;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_crypto::{keccak256, PublicKeyBytes};
use shared_types::NodeId;
use std::fmt;
use std::str::FromStr;

/// A parsed v4 enode URL.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnodeUrl {
    #[serde_as(as = "Bytes")]
    public_key: PublicKeyBytes,
    host: String,
    port: u16,
}

impl EnodeUrl {
    /// Build an enode URL from its parts.
    pub fn new(public_key: PublicKeyBytes, host: impl Into<String>, port: u16) -> Self {
        Self {
            public_key,
            host: host.into(),
            port,
        }
    }

    /// The node's uncompressed public key body (64 bytes).
    pub fn public_key(&self) -> PublicKeyBytes {
        self.public_key
    }

    /// The node identifier: Keccak-256 of the public key body.
    pub fn node_id(&self) -> NodeId {
        keccak256(&self.public_key)
    }

    /// Endpoint host (IP or DNS name).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Endpoint TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for EnodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "enode://{}@{}:{}",
            hex::encode(&self.public_key),
            self.host,
            self.port
        )
    }
}

impl FromStr for EnodeUrl {
    type Err = AnnounceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("enode://")
            .ok_or_else(|| AnnounceError::InvalidEnode(format!("missing scheme: {s}")))?;

        let (key_hex, endpoint) = rest
            .split_once('@')
            .ok_or_else(|| AnnounceError::InvalidEnode(format!("missing endpoint: {s}")))?;

        if key_hex.len() != 128 {
            return Err(AnnounceError::InvalidEnode(format!(
                "public key must be 128 hex chars, got {}",
                key_hex.len()
            )));
        }
        let key_bytes = hex::decode(key_hex)
            .map_err(|e| AnnounceError::InvalidEnode(format!("bad public key hex: {e}")))?;
        let public_key: PublicKeyBytes = key_bytes
            .try_into()
            .expect("128 hex chars decode to 64 bytes");

        let (host, port_str) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| AnnounceError::InvalidEnode(format!("missing port: {s}")))?;
        if host.is_empty() {
            return Err(AnnounceError::InvalidEnode(format!("empty host: {s}")));
        }
        let port: u16 = port_str
            .parse()
            .map_err(|_| AnnounceError::InvalidEnode(format!("bad port: {port_str}")))?;

        Ok(Self {
            public_key,
            host: host.to_string(),
            port,
        })
    }
}
