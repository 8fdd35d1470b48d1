//! # ECDSA Signatures (secp256k1)
//!
//! Recoverable ECDSA over the secp256k1 curve.
//!
//! ## Security Properties
//!
//! - RFC 6979 deterministic nonces (no RNG dependency for signing)
//! - Low-S normalization
//! - 65-byte `r || s || v` signatures; the signer's public key and address
//!   are recovered from the signature, so the wire never carries keys
//!
//! ## Use Cases
//!
//! - Envelope signing for gossip messages
//! - Version certificate signing
//! - Validator address derivation (Keccak-256 of the uncompressed key)

use crate::errors::CryptoError;
use crate::hashing::keccak256;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use shared_types::Address;
use zeroize::Zeroize;

/// Uncompressed secp256k1 public key body: `x || y`, 64 bytes.
pub type PublicKeyBytes = [u8; 64];

/// A 65-byte recoverable signature: `r || s || v` with `v` in `{0, 1}`.
pub type RecoverableSignature = [u8; 65];

/// Length of a recoverable signature in bytes.
pub const SIGNATURE_LENGTH: usize = 65;

/// secp256k1 ECDSA keypair.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a random keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Create from secret key bytes (32 bytes).
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_bytes((&bytes).into())
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Get the uncompressed public key body (`x || y`, 64 bytes).
    pub fn public_key(&self) -> PublicKeyBytes {
        encode_public_key(self.signing_key.verifying_key())
    }

    /// Get the validator address derived from the public key.
    pub fn address(&self) -> Address {
        address_from_public_key(&self.public_key())
    }

    /// Sign a 32-byte prehash, producing a recoverable `r || s || v` signature.
    pub fn sign_prehash_recoverable(
        &self,
        prehash: &[u8; 32],
    ) -> Result<RecoverableSignature, CryptoError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(prehash)
            .map_err(|_| CryptoError::InvalidSignature)?;

        let mut out = [0u8; SIGNATURE_LENGTH];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }

    /// Get secret key bytes (for serialization).
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    /// Borrow the inner signing key (for ECDH in the ECIES module).
    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl Drop for Keypair {
    fn drop(&mut self) {
        // Zeroize secret key material
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}

/// Derive a validator address: low 20 bytes of Keccak-256 of the key body.
pub fn address_from_public_key(public_key: &PublicKeyBytes) -> Address {
    let digest = keccak256(public_key);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    address
}

/// Recover the uncompressed public key body from a recoverable signature.
pub fn recover_public_key(
    prehash: &[u8; 32],
    signature: &[u8],
) -> Result<PublicKeyBytes, CryptoError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(CryptoError::InvalidSignatureLength {
            expected: SIGNATURE_LENGTH,
            actual: signature.len(),
        });
    }

    let sig = Signature::from_slice(&signature[..64]).map_err(|_| CryptoError::InvalidSignature)?;
    let recovery_id =
        RecoveryId::from_byte(signature[64]).ok_or(CryptoError::InvalidSignature)?;

    let verifying_key = VerifyingKey::recover_from_prehash(prehash, &sig, recovery_id)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(encode_public_key(&verifying_key))
}

/// Recover the signer's address from a recoverable signature.
pub fn recover_address(prehash: &[u8; 32], signature: &[u8]) -> Result<Address, CryptoError> {
    Ok(address_from_public_key(&recover_public_key(
        prehash, signature,
    )?))
}

/// Verify a recoverable signature against a known public key.
pub fn verify_prehash(
    prehash: &[u8; 32],
    signature: &[u8],
    public_key: &PublicKeyBytes,
) -> Result<(), CryptoError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(CryptoError::InvalidSignatureLength {
            expected: SIGNATURE_LENGTH,
            actual: signature.len(),
        });
    }

    let sig = Signature::from_slice(&signature[..64]).map_err(|_| CryptoError::InvalidSignature)?;
    let verifying_key = decode_public_key(public_key)?;
    verifying_key
        .verify_prehash(prehash, &sig)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}

/// Decode a 64-byte key body into a verifying key.
pub(crate) fn decode_public_key(public_key: &PublicKeyBytes) -> Result<VerifyingKey, CryptoError> {
    let mut sec1 = [0u8; 65];
    sec1[0] = 0x04;
    sec1[1..].copy_from_slice(public_key);
    VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| CryptoError::InvalidPublicKey)
}

fn encode_public_key(verifying_key: &VerifyingKey) -> PublicKeyBytes {
    let point = verifying_key.to_encoded_point(false);
    let mut body = [0u8; 64];
    body.copy_from_slice(&point.as_bytes()[1..]);
    body
}
