//! Enode certificates.
//!
//! A signed `{enode_url, version}` statement delivered privately to
//! validators, binding a sender (or one of its proxies) to a reachable
//! endpoint. Travels inside the signed envelope with code
//! [`ENODE_CERTIFICATE_MSG`](crate::domain::message::ENODE_CERTIFICATE_MSG).

use crate::error::AnnounceError;
use rlp::{DecoderError, Rlp, RlpStream};
use shared_types::Version;

/// Inner payload of an enode-certificate message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnodeCertificate {
    /// The externally reachable enode URL being advertised.
    pub enode_url: String,
    /// The announce version the certificate was generated at.
    pub version: Version,
}

impl EnodeCertificate {
    /// Serialize to RLP bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    /// Parse from RLP bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AnnounceError> {
        Ok(rlp::decode(bytes)?)
    }
}

impl rlp::Encodable for EnodeCertificate {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(2);
        stream.append(&self.enode_url);
        stream.append(&self.version);
    }
}

impl rlp::Decodable for EnodeCertificate {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            enode_url: rlp.val_at(0)?,
            version: rlp.val_at(1)?,
        })
    }
}
