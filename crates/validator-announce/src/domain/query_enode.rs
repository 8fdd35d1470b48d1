//! Query-enode inner payload.
//!
//! A query-enode message carries the sender's externally reachable enode
//! URL encrypted once per destination validator, plus the sender's
//! announce version. The `timestamp` field perturbs the payload hash on
//! every emission so downstream nodes regossip freshly generated copies
//! even when the version has not changed.

use crate::error::AnnounceError;
use rlp::{DecoderError, Rlp, RlpStream};
use shared_types::{Address, Version};
use std::collections::HashSet;

/// One ECIES ciphertext addressed to a single destination validator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedEnodeUrl {
    /// The validator the ciphertext is encrypted to.
    pub dest_address: Address,
    /// ECIES ciphertext of the sender's enode URL bytes.
    pub ciphertext: Vec<u8>,
}

impl rlp::Encodable for EncryptedEnodeUrl {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(2);
        stream.append(&self.dest_address.to_vec());
        stream.append(&self.ciphertext);
    }
}

impl rlp::Decodable for EncryptedEnodeUrl {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let address_bytes: Vec<u8> = rlp.val_at(0)?;
        let dest_address: Address = address_bytes
            .try_into()
            .map_err(|_| DecoderError::Custom("destination address must be 20 bytes"))?;
        Ok(Self {
            dest_address,
            ciphertext: rlp.val_at(1)?,
        })
    }
}

/// Inner payload of a query-enode message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryEnodeData {
    /// Ordered per-destination ciphertexts.
    pub encrypted_enode_urls: Vec<EncryptedEnodeUrl>,
    /// The sender's announce version.
    pub version: Version,
    /// Generation timestamp (seconds); makes every emission hash-unique.
    pub timestamp: Version,
}

impl QueryEnodeData {
    /// Serialize to RLP bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    /// Parse from RLP bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AnnounceError> {
        Ok(rlp::decode(bytes)?)
    }
}

impl rlp::Encodable for QueryEnodeData {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(3);
        stream.append_list(&self.encrypted_enode_urls);
        stream.append(&self.version);
        stream.append(&self.timestamp);
    }
}

impl rlp::Decodable for QueryEnodeData {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 3 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            encrypted_enode_urls: rlp.list_at(0)?,
            version: rlp.val_at(1)?,
            timestamp: rlp.val_at(2)?,
        })
    }
}

/// Structural validation of a received query-enode payload.
///
/// Rejects duplicate destination addresses and payloads with more than
/// twice as many entries as the current validator connection set. Both
/// bounds cap the amplification a malicious validator can extract from
/// one gossiped message.
pub fn validate_query_enode(
    data: &QueryEnodeData,
    conn_set_len: usize,
) -> Result<(), AnnounceError> {
    let mut seen: HashSet<Address> = HashSet::with_capacity(data.encrypted_enode_urls.len());
    for entry in &data.encrypted_enode_urls {
        if !seen.insert(entry.dest_address) {
            return Err(AnnounceError::DuplicateEntries {
                address: entry.dest_address,
            });
        }
    }

    let max = 2 * conn_set_len;
    if data.encrypted_enode_urls.len() > max {
        return Err(AnnounceError::TooManyEntries {
            count: data.encrypted_enode_urls.len(),
            max,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(dest: u8, ct: &[u8]) -> EncryptedEnodeUrl {
        EncryptedEnodeUrl {
            dest_address: [dest; 20],
            ciphertext: ct.to_vec(),
        }
    }

    fn sample() -> QueryEnodeData {
        QueryEnodeData {
            encrypted_enode_urls: vec![entry(1, &[0xAA; 113]), entry(2, &[0xBB; 113])],
            version: 1_700_000_000,
            timestamp: 1_700_000_005,
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let data = sample();
        assert_eq!(QueryEnodeData::from_bytes(&data.to_bytes()).unwrap(), data);
    }

    #[test]
    fn test_empty_entry_list_roundtrip() {
        let data = QueryEnodeData {
            encrypted_enode_urls: Vec::new(),
            version: 5,
            timestamp: 6,
        };
        assert_eq!(QueryEnodeData::from_bytes(&data.to_bytes()).unwrap(), data);
    }

    #[test]
    fn test_validate_accepts_sane_payload() {
        assert!(validate_query_enode(&sample(), 3).is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_destination() {
        let mut data = sample();
        data.encrypted_enode_urls.push(entry(1, &[0xCC; 113]));
        assert!(matches!(
            validate_query_enode(&data, 3),
            Err(AnnounceError::DuplicateEntries { address }) if address == [1; 20]
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_payload() {
        let data = QueryEnodeData {
            encrypted_enode_urls: (0..7).map(|i| entry(i, &[i; 8])).collect(),
            version: 1,
            timestamp: 1,
        };
        // Seven entries against a three-validator set exceeds the 2x bound.
        assert!(matches!(
            validate_query_enode(&data, 3),
            Err(AnnounceError::TooManyEntries { count: 7, max: 6 })
        ));
    }

    #[test]
    fn test_timestamp_changes_payload_bytes() {
        let a = sample();
        let mut b = sample();
        b.timestamp += 1;
        assert_ne!(a.to_bytes(), b.to_bytes());
    }
}
