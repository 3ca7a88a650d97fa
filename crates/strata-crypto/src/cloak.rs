//! Cloaked receiver addresses.
//!
//! A cloak names the key a layer is encrypted to without revealing it:
//!
//! ```text
//! cloak = blinder[3] || keyed_hash(K_cloak, blinder || pubkey)[..5]
//! K_cloak = BLAKE3::derive_key("Strata v1 cloak-key", "")
//! ```
//!
//! A fresh random blinder per layer makes two cloaks of the same key
//! unlinkable. A node recognises a cloak by recomputing it with the carried
//! blinder for each public key it holds.

use rand::RngCore;

use crate::blake3::{self, contexts};
use crate::x25519::X25519PublicKey;

/// Bytes of random blinding factor at the start of a cloak.
pub const BLINDER_LEN: usize = 3;

/// Total cloak length in bytes.
pub const CLOAK_LEN: usize = 8;

/// A cloaked public key.
pub type Cloak = [u8; CLOAK_LEN];

/// Cloak a public key with a fresh random blinder.
pub fn cloak(key: &X25519PublicKey) -> Cloak {
    let mut blinder = [0u8; BLINDER_LEN];
    rand::thread_rng().fill_bytes(&mut blinder);
    cloak_with(blinder, key)
}

/// Cloak a public key with the given blinder.
pub fn cloak_with(blinder: [u8; BLINDER_LEN], key: &X25519PublicKey) -> Cloak {
    let k_cloak = blake3::derive_key(contexts::CLOAK_KEY, b"");
    let mut message = [0u8; BLINDER_LEN + 32];
    message[..BLINDER_LEN].copy_from_slice(&blinder);
    message[BLINDER_LEN..].copy_from_slice(key.as_bytes());
    let digest = blake3::keyed_hash(&k_cloak, &message);

    let mut out = [0u8; CLOAK_LEN];
    out[..BLINDER_LEN].copy_from_slice(&blinder);
    out[BLINDER_LEN..].copy_from_slice(&digest[..CLOAK_LEN - BLINDER_LEN]);
    out
}

/// Whether `cloak` was produced from `key`.
pub fn matches(cloak: &Cloak, key: &X25519PublicKey) -> bool {
    let mut blinder = [0u8; BLINDER_LEN];
    blinder.copy_from_slice(&cloak[..BLINDER_LEN]);
    cloak_with(blinder, key) == *cloak
}
