//! Error types for the announce subsystem.

use shared_crypto::CryptoError;
use thiserror::Error;

/// Announce subsystem errors.
///
/// Inbound handler errors are returned to the transport, which may penalize
/// the offending peer. The control loop logs every error and continues; no
/// error here is ever fatal to the loop.
#[derive(Debug, Error)]
pub enum AnnounceError {
    /// Backing-store failure in one of the durable tables.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Wire encoding or decoding failure.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Signing, verification, encryption or decryption failure.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Message sender is not in the validator connection set.
    #[error("Unauthorized message from 0x{}", hex::encode(.sender))]
    UnauthorizedMessage {
        /// The recovered sender address.
        sender: [u8; 20],
    },

    /// A query-enode message named the same destination twice.
    #[error("Duplicate destination 0x{} in query-enode message", hex::encode(.address))]
    DuplicateEntries {
        /// The duplicated destination address.
        address: [u8; 20],
    },

    /// A query-enode message exceeded the entry-count bound.
    #[error("Query-enode message has {count} encrypted entries (max {max})")]
    TooManyEntries {
        /// Number of encrypted entries in the message.
        count: usize,
        /// Twice the validator connection set size.
        max: usize,
    },

    /// Enode certificate map is empty or its messages do not all share one
    /// version.
    #[error("Enode certificate messages are empty or do not share a single version")]
    InvalidCertificateMap,

    /// An enode URL failed to parse.
    #[error("Invalid enode URL: {0}")]
    InvalidEnode(String),

    /// The transport failed to deliver a payload.
    #[error("Network error: {0}")]
    Network(String),

    /// A proxy engine operation failed.
    #[error("Proxy error: {0}")]
    Proxy(String),
}

impl From<rlp::DecoderError> for AnnounceError {
    fn from(err: rlp::DecoderError) -> Self {
        AnnounceError::Codec(err.to_string())
    }
}
