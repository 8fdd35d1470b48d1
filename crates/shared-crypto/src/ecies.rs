//! # ECIES (secp256k1)
//!
//! Integrated encryption for per-destination payloads, with parameters
//! fixed by the announce wire contract:
//!
//! - KDF: NIST SP 800-56A concatenation KDF with SHA-256
//! - MAC: HMAC-SHA-256 over `IV || ciphertext`
//! - Cipher: AES-128-CTR with a random 16-byte IV
//! - No shared-info associated data (`s1`/`s2` empty)
//!
//! ## Wire layout
//!
//! `0x04 || ephemeral-pubkey-xy (64) || IV (16) || ciphertext || MAC (32)`
//!
//! A fresh ephemeral key is generated per encryption, so encrypting the
//! same plaintext twice yields unrelated ciphertexts.

use crate::ecdsa::{Keypair, PublicKeyBytes};
use crate::errors::CryptoError;
use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use k256::ecdh;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{NonZeroScalar, PublicKey};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;
type Aes128Ctr = Ctr128BE<Aes128>;

const EPHEMERAL_LENGTH: usize = 65;
const IV_LENGTH: usize = 16;
const MAC_LENGTH: usize = 32;
const KEY_LENGTH: usize = 16;

/// Minimum ciphertext length: ephemeral key, IV and MAC around an empty body.
pub const MIN_CIPHERTEXT_LENGTH: usize = EPHEMERAL_LENGTH + IV_LENGTH + MAC_LENGTH;

/// Encrypt `plaintext` to the holder of `recipient`'s secret key.
pub fn ecies_encrypt(
    recipient: &PublicKeyBytes,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let recipient_key = decode_point(recipient)?;

    let ephemeral = NonZeroScalar::random(&mut rand::thread_rng());
    let ephemeral_public = PublicKey::from_secret_scalar(&ephemeral);

    let shared = shared_x_coordinate(&ephemeral, &recipient_key);
    let (enc_key, mac_key) = derive_keys(&shared);

    let mut iv = [0u8; IV_LENGTH];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut body = plaintext.to_vec();
    let mut cipher = Aes128Ctr::new(&enc_key.into(), &iv.into());
    cipher.apply_keystream(&mut body);

    let mut out = Vec::with_capacity(MIN_CIPHERTEXT_LENGTH + body.len());
    out.extend_from_slice(ephemeral_public.to_encoded_point(false).as_bytes());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&body);
    out.extend_from_slice(&message_tag(&mac_key, &iv, &body));
    Ok(out)
}

/// Decrypt a ciphertext produced by [`ecies_encrypt`] with our secret key.
pub fn ecies_decrypt(keypair: &Keypair, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < MIN_CIPHERTEXT_LENGTH {
        return Err(CryptoError::CiphertextTooShort {
            minimum: MIN_CIPHERTEXT_LENGTH,
            actual: ciphertext.len(),
        });
    }

    let (ephemeral_bytes, rest) = ciphertext.split_at(EPHEMERAL_LENGTH);
    let (iv, rest) = rest.split_at(IV_LENGTH);
    let (body, tag) = rest.split_at(rest.len() - MAC_LENGTH);

    let ephemeral_key =
        PublicKey::from_sec1_bytes(ephemeral_bytes).map_err(|_| CryptoError::InvalidPublicKey)?;

    let secret_scalar: &NonZeroScalar = keypair.signing_key().as_nonzero_scalar();
    let shared = shared_x_coordinate(secret_scalar, &ephemeral_key);
    let (enc_key, mac_key) = derive_keys(&shared);

    let mut mac = HmacSha256::new_from_slice(&mac_key).expect("HMAC accepts any key length");
    mac.update(iv);
    mac.update(body);
    mac.verify_slice(tag)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let iv_block: [u8; IV_LENGTH] = iv.try_into().expect("IV is exactly 16 bytes");
    let mut plaintext = body.to_vec();
    let mut cipher = Aes128Ctr::new(&enc_key.into(), &iv_block.into());
    cipher.apply_keystream(&mut plaintext);
    Ok(plaintext)
}

/// ECDH x-coordinate of `scalar * point`.
fn shared_x_coordinate(scalar: &NonZeroScalar, point: &PublicKey) -> [u8; 32] {
    let shared = ecdh::diffie_hellman(scalar, point.as_affine());
    let mut x = [0u8; 32];
    x.copy_from_slice(shared.raw_secret_bytes().as_slice());
    x
}

/// Concatenation KDF: split the 32 derived bytes into the AES key and the
/// (re-hashed) MAC key.
fn derive_keys(shared: &[u8; 32]) -> ([u8; KEY_LENGTH], [u8; 32]) {
    let derived = concat_kdf(shared, 2 * KEY_LENGTH);

    let mut enc_key = [0u8; KEY_LENGTH];
    enc_key.copy_from_slice(&derived[..KEY_LENGTH]);

    let mac_key: [u8; 32] = Sha256::digest(&derived[KEY_LENGTH..]).into();
    (enc_key, mac_key)
}

/// NIST SP 800-56A concatenation KDF over SHA-256 with no shared info.
fn concat_kdf(secret: &[u8], length: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(length);
    let mut counter: u32 = 1;
    while out.len() < length {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(secret);
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(length);
    out
}

fn message_tag(mac_key: &[u8; 32], iv: &[u8], body: &[u8]) -> [u8; MAC_LENGTH] {
    let mut mac = HmacSha256::new_from_slice(mac_key).expect("HMAC accepts any key length");
    mac.update(iv);
    mac.update(body);
    mac.finalize().into_bytes().into()
}

fn decode_point(public_key: &PublicKeyBytes) -> Result<PublicKey, CryptoError> {
    let mut sec1 = [0u8; 65];
    sec1[0] = 0x04;
    sec1[1..].copy_from_slice(public_key);
    PublicKey::from_sec1_bytes(&sec1).map_err(|_| CryptoError::InvalidPublicKey)
}
