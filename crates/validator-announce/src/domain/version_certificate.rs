//! Version certificates.
//!
//! A version certificate is a validator's signed statement "my current
//! announce version is V". Any observer can learn that a validator has
//! advanced without learning its endpoint. Only `{version, signature}`
//! travel on the wire; the signer's public key and address are recovered
//! from the signature.

use crate::error::AnnounceError;
use rlp::{DecoderError, Rlp, RlpStream};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_crypto::{
    keccak256, recover_public_key, CryptoError, Keypair, PublicKeyBytes, RecoverableSignature,
};
use shared_types::{Address, Version};

/// Domain-separation salt prepended to the signed tuple. Keeps a
/// certificate signature from validating as any other signed structure
/// with the same field types.
const VERSION_CERTIFICATE_SALT: &[u8] = b"versionCertificate";

/// A signed announce-version statement.
///
/// `address` and `public_key` are never encoded; they are filled in by
/// [`VersionCertificate::recover`] after decoding.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCertificate {
    /// The signer's validator address (recovered).
    pub address: Address,
    /// The signer's uncompressed public key body (recovered).
    #[serde_as(as = "Bytes")]
    pub public_key: PublicKeyBytes,
    /// The asserted announce version.
    pub version: Version,
    /// 65-byte recoverable signature over the salted version tuple.
    pub signature: Vec<u8>,
}

impl VersionCertificate {
    /// Create and sign a certificate for our own address.
    pub fn create<F>(
        version: Version,
        address: Address,
        public_key: PublicKeyBytes,
        signer: F,
    ) -> Result<Self, AnnounceError>
    where
        F: FnOnce(&[u8; 32]) -> Result<RecoverableSignature, CryptoError>,
    {
        let hash = signing_hash(version);
        let signature = signer(&hash)?.to_vec();
        Ok(Self {
            address,
            public_key,
            version,
            signature,
        })
    }

    /// Create and sign with a local keypair (test and standalone paths).
    pub fn create_with_keypair(version: Version, keypair: &Keypair) -> Result<Self, AnnounceError> {
        Self::create(version, keypair.address(), keypair.public_key(), |hash| {
            keypair.sign_prehash_recoverable(hash)
        })
    }

    /// Recover the signer's public key and address from the signature.
    pub fn recover(&mut self) -> Result<(), AnnounceError> {
        let hash = signing_hash(self.version);
        let public_key = recover_public_key(&hash, &self.signature)?;
        self.public_key = public_key;
        self.address = shared_crypto::ecdsa::address_from_public_key(&public_key);
        Ok(())
    }
}

/// Keccak-256 of `rlp(["versionCertificate", version])`.
fn signing_hash(version: Version) -> [u8; 32] {
    let mut stream = RlpStream::new_list(2);
    stream.append(&VERSION_CERTIFICATE_SALT.to_vec());
    stream.append(&version);
    keccak256(&stream.out())
}

impl rlp::Encodable for VersionCertificate {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(2);
        stream.append(&self.version);
        stream.append(&self.signature);
    }
}

impl rlp::Decodable for VersionCertificate {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            address: [0u8; 20],
            public_key: [0u8; 64],
            version: rlp.val_at(0)?,
            signature: rlp.val_at(1)?,
        })
    }
}

/// Encode a batch of certificates as the version-certificates inner payload.
pub fn encode_certificates(certificates: &[VersionCertificate]) -> Vec<u8> {
    let mut stream = RlpStream::new();
    stream.append_list(certificates);
    stream.out().to_vec()
}

/// Decode the version-certificates inner payload.
pub fn decode_certificates(bytes: &[u8]) -> Result<Vec<VersionCertificate>, AnnounceError> {
    let rlp = Rlp::new(bytes);
    Ok(rlp.as_list()?)
}
