//! Crypto error types.

use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Decryption failed or ciphertext authentication mismatch
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Ciphertext too short to contain the fixed-size header and MAC
    #[error("Ciphertext too short: {actual} bytes (minimum {minimum})")]
    CiphertextTooShort {
        /// Minimum ciphertext length in bytes
        minimum: usize,
        /// Actual ciphertext length in bytes
        actual: usize,
    },

    /// Invalid signature length
    #[error("Invalid signature length: expected {expected}, got {actual}")]
    InvalidSignatureLength {
        /// Expected signature length in bytes
        expected: usize,
        /// Actual signature length in bytes
        actual: usize,
    },

    /// Signature verification failed
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Public key recovery from a signature failed
    #[error("Public key recovery failed")]
    RecoveryFailed,

    /// Invalid public key
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Invalid private key
    #[error("Invalid private key")]
    InvalidPrivateKey,

    /// Invalid signature
    #[error("Invalid signature")]
    InvalidSignature,
}
