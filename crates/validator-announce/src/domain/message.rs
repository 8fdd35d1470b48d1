//! Signed gossip envelope.
//!
//! All three announce message kinds travel in one envelope:
//! `rlp([code, address, msg, signature])`. The signature is secp256k1 over
//! Keccak-256 of `rlp([code, address, msg])`, so the sender's address can
//! be recovered and checked against the `address` field.
//!
//! Version-certificates envelopes are the exception: they carry a zero
//! address and an empty signature, because authenticity lives in each
//! inner certificate's own signature.

use crate::error::AnnounceError;
use rlp::{DecoderError, Rlp, RlpStream};
use shared_crypto::{keccak256, recover_address, CryptoError, RecoverableSignature};
use shared_types::Address;

/// Query-enode gossip message code.
pub const QUERY_ENODE_MSG: u8 = 0x12;
/// Version-certificates gossip message code.
pub const VERSION_CERTIFICATES_MSG: u8 = 0x13;
/// Enode-certificate message code.
pub const ENODE_CERTIFICATE_MSG: u8 = 0x14;

/// The signed envelope shared by every announce message kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Message code (one of the `*_MSG` constants).
    pub code: u8,
    /// Claimed sender address; zero for version-certificates envelopes.
    pub address: Address,
    /// RLP-encoded inner payload.
    pub msg: Vec<u8>,
    /// 65-byte recoverable signature; empty for version-certificates
    /// envelopes.
    pub signature: Vec<u8>,
}

impl Message {
    /// Build an unsigned envelope.
    pub fn new(code: u8, address: Address, msg: Vec<u8>) -> Self {
        Self {
            code,
            address,
            msg,
            signature: Vec::new(),
        }
    }

    /// Build an unsigned, unaddressed envelope (version-certificates).
    pub fn unsigned(code: u8, msg: Vec<u8>) -> Self {
        Self::new(code, [0u8; 20], msg)
    }

    /// Serialize to wire bytes.
    pub fn payload(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    /// Parse an envelope from wire bytes.
    pub fn from_payload(payload: &[u8]) -> Result<Self, AnnounceError> {
        Ok(rlp::decode(payload)?)
    }

    /// The digest the signature covers: Keccak-256 of
    /// `rlp([code, address, msg])`.
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut stream = RlpStream::new_list(3);
        stream.append(&self.code);
        stream.append(&self.address.to_vec());
        stream.append(&self.msg);
        keccak256(&stream.out())
    }

    /// Sign the envelope with the node's signing function.
    pub fn sign_with<F>(&mut self, signer: F) -> Result<(), AnnounceError>
    where
        F: FnOnce(&[u8; 32]) -> Result<RecoverableSignature, CryptoError>,
    {
        let hash = self.signing_hash();
        self.signature = signer(&hash)?.to_vec();
        Ok(())
    }

    /// Verify the signature and return the recovered sender address.
    ///
    /// Fails if recovery fails or the recovered address does not match the
    /// envelope's `address` field.
    pub fn verify(&self) -> Result<Address, AnnounceError> {
        let hash = self.signing_hash();
        let recovered = recover_address(&hash, &self.signature)?;
        if recovered != self.address {
            return Err(AnnounceError::Crypto(
                CryptoError::SignatureVerificationFailed,
            ));
        }
        Ok(recovered)
    }
}

impl rlp::Encodable for Message {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(4);
        stream.append(&self.code);
        stream.append(&self.address.to_vec());
        stream.append(&self.msg);
        stream.append(&self.signature);
    }
}

impl rlp::Decodable for Message {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 4 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let code: u8 = rlp.val_at(0)?;
        let address_bytes: Vec<u8> = rlp.val_at(1)?;
        let address: Address = address_bytes
            .try_into()
            .map_err(|_| DecoderError::Custom("address must be 20 bytes"))?;
        Ok(Self {
            code,
            address,
            msg: rlp.val_at(2)?,
            signature: rlp.val_at(3)?,
        })
    }
}
