//! # strata-crypto
//!
//! Cryptographic primitives for the Strata relay network.
//!
//! The suite is fixed: there is no algorithm negotiation between nodes.
//!
//! ## Modules
//!
//! - [`blake3`]: Domain-separated BLAKE3 hashing and key derivation
//! - [`x25519`]: X25519 key agreement and onion cipher derivation (RFC 7748)
//! - [`chacha20`]: ChaCha20 keystream for onion layers, ChaCha20-Poly1305 AEAD for packets
//! - [`cloak`]: Blinded receiver addresses derived from public keys
//! - [`ed25519`]: Ed25519 signatures for peer advertisements (RFC 8032)

pub mod blake3;
pub mod chacha20;
pub mod cloak;
pub mod ed25519;
pub mod x25519;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ed25519 signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    #[error("AEAD seal failed")]
    AeadSeal,

    /// Tag mismatch: the sealed bytes or their header were altered.
    #[error("AEAD open failed")]
    AeadOpen,

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
