//! BLAKE3 key derivation for Strata.
//!
//! Every symmetric key in the protocol comes out of [`derive_key`] under one
//! of the context strings in [`contexts`], so an onion cipher can never be
//! confused with a packet cipher derived from the same shared secret.
//! Cloaked addresses use the keyed mode via [`keyed_hash`].

/// Context strings for [`derive_key`]. All carry the `Strata v1 ` prefix.
pub mod contexts {
    /// Per-layer onion keystream keys.
    pub const ONION_CIPHER: &str = "Strata v1 onion-cipher";
    /// Per-packet AEAD keys on lossy links.
    pub const PACKET_CIPHER: &str = "Strata v1 packet-cipher";
    /// Session preimages from the header and payload secrets.
    pub const SESSION_PREIMAGE: &str = "Strata v1 session-preimage";
    pub const CLOAK_KEY: &str = "Strata v1 cloak-key";
    /// Digest signed by advertisement keys.
    pub const AD_SIGNATURE: &str = "Strata v1 ad-signature";
}

/// Derive 32 bytes from `material` under a context string.
pub fn derive_key(context: &str, material: &[u8]) -> [u8; 32] {
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(material);
    *hasher.finalize().as_bytes()
}

/// Keyed BLAKE3 over `message`.
pub fn keyed_hash(key: &[u8; 32], message: &[u8]) -> [u8; 32] {
    *::blake3::keyed_hash(key, message).as_bytes()
}

/// Length-prefix each field (`u32` little endian) and concatenate.
///
/// Used whenever more than one variable input feeds a derivation, so that
/// `("ab", "c")` and `("a", "bc")` never produce the same material.
pub fn encode_multi_field(fields: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(fields.iter().map(|f| 4 + f.len()).sum());
    for field in fields {
        out.extend_from_slice(&(field.len() as u32).to_le_bytes());
        out.extend_from_slice(field);
    }
    out
}
