//! # Shared Crypto - Announce Wire Primitives
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `hashing` | Keccak-256 | Message digests, address derivation |
//! | `ecdsa` | secp256k1 | Recoverable envelope/certificate signing |
//! | `ecies` | secp256k1 + AES-128-CTR | Per-destination enode URL encryption |
//!
//! ## Security Properties
//!
//! - **secp256k1**: RFC 6979 deterministic nonces, 65-byte `r||s||v`
//!   signatures with public-key recovery
//! - **ECIES**: concat-KDF/SHA-256, HMAC-SHA-256 authentication,
//!   fresh ephemeral key per encryption

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ecdsa;
pub mod ecies;
pub mod errors;
pub mod hashing;

pub use ecdsa::{
    recover_address, recover_public_key, verify_prehash, Keypair, PublicKeyBytes,
    RecoverableSignature, SIGNATURE_LENGTH,
};
pub use ecies::{ecies_decrypt, ecies_encrypt};
pub use errors::CryptoError;
pub use hashing::{keccak256, keccak256_many};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
