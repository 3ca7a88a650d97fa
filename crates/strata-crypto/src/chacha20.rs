//! ChaCha20 encryption.
//!
//! Two modes are used:
//!
//! - [`apply_keystream`]: the bare ChaCha20 stream cipher. Onion layers are
//!   encrypted and decrypted in place with it, so a relay can strip one layer
//!   from a buffer without changing its length.
//! - [`seal`]/[`open`]: ChaCha20-Poly1305 AEAD (RFC 8439). Every packet
//!   shard is sealed with it, so a corrupted shard fails authentication and is
//!   treated as an erasure.

use ::chacha20::cipher::{KeyIvInit, StreamCipher};
use ::chacha20::ChaCha20;
use ::chacha20::{Key as StreamKey, Nonce as StreamNonce};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};

use crate::{CryptoError, Result};

/// Nonce size for ChaCha20 and ChaCha20-Poly1305 (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Key size (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Authentication tag size (128 bits = 16 bytes).
pub const TAG_SIZE: usize = 16;

/// XOR the ChaCha20 keystream for `key`/`nonce` over `data` in place.
///
/// Applying it twice with the same key and nonce restores the input.
pub fn apply_keystream(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], data: &mut [u8]) {
    let mut cipher = ChaCha20::new(StreamKey::from_slice(key), StreamNonce::from_slice(nonce));
    cipher.apply_keystream(data);
}

/// Seal a packet body with ChaCha20-Poly1305, authenticating `aad`.
///
/// The result is the ciphertext followed by a [`TAG_SIZE`] tag.
pub fn seal(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], body: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    ChaCha20Poly1305::new(Key::from_slice(key))
        .encrypt(Nonce::from_slice(nonce), Payload { msg: body, aad })
        .map_err(|_| CryptoError::AeadSeal)
}

/// Open a sealed body. Any change to the ciphertext, tag or `aad` fails.
pub fn open(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    ChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad })
        .map_err(|_| CryptoError::AeadOpen)
}
