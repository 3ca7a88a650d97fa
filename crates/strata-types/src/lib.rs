//! # strata-types
//!
//! Shared primitive types and the binary cursor buffer used by every Strata
//! wire format.
//!
//! ## Field widths
//!
//! | Field | Bytes |
//! |---|---|
//! | Magic | 4 |
//! | Id | 8 |
//! | Iv (nonce) | 12 |
//! | Public / private key | 32 |
//! | Cloak | 8 |
//! | Hash / cipher | 32 |
//! | Signature | 64 |
//! | Timestamp (unix seconds) | 8 |
//! | Address | 19 |
//!
//! All integers are little-endian.

pub mod id;
pub mod splice;

pub use id::{new_iv, Id, Iv};
pub use splice::Splice;

/// A 32-byte hash, also used for symmetric cipher keys.
pub type Hash = [u8; 32];

/// A four byte ASCII type tag.
pub type Magic = [u8; MAGIC_LEN];

/// An opaque balance amount. Only addition, subtraction and a zero floor apply.
pub type Amount = u64;

pub const MAGIC_LEN: usize = 4;
pub const ID_LEN: usize = 8;
pub const IV_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
pub const CLOAK_LEN: usize = 8;
pub const HASH_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
pub const TIME_LEN: usize = 8;

/// Largest address body: 16 IPv6 bytes plus a 2-byte port.
pub const ADDR_BODY_LEN: usize = 18;

/// Address field width: a length byte plus the zero-padded body.
pub const ADDR_LEN: usize = 1 + ADDR_BODY_LEN;

/// Render a magic tag for diagnostics.
pub fn magic_str(magic: &[u8]) -> String {
    String::from_utf8_lossy(magic).into_owned()
}

/// Error types for binary cursor operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpliceError {
    /// The buffer holds fewer bytes than the field or layer requires.
    #[error("{magic}: buffer too short, {available} bytes available, {required} required")]
    TooShort {
        available: usize,
        required: usize,
        magic: String,
    },

    /// An address field carried an unknown length byte.
    #[error("invalid address length byte {0}")]
    InvalidAddress(u8),
}

pub type Result<T> = std::result::Result<T, SpliceError>;
