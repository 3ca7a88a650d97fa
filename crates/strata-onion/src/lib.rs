//! # strata-onion
//!
//! Onion construction, relaying and billing for the Strata relay network.
//!
//! - [`layers`] - the layer variants and their wire encodings
//! - [`registry`] - magic-keyed recognition of inbound layers
//! - [`onion`] - assembling layer lists and encoding them with per-hop encryption
//! - [`account`] - deciding which sessions a client debits for an onion
//! - [`session`] / [`manager`] - nodes, sessions, circuit and hop selection
//! - [`pending`] / [`payment`] - outstanding replies and unclaimed payments
//! - [`hidden`] / [`services`] - hosted hidden services and locally bound ports
//! - [`engine`] - the per-node dispatch loop and its handlers
//! - [`client`] - sending exit, balance, route and purchase onions
//!
//! ## Circuit shape
//!
//! | Position | Role |
//! |---|---|
//! | 0, 1 | forward relays |
//! | 2 | exit (or balance / route pivot) |
//! | 3, 4 | reverse relays |
//! | 5 | the sender's own return hop |

pub mod account;
pub mod client;
pub mod engine;
pub mod hidden;
pub mod layers;
pub mod manager;
pub mod onion;
pub mod payment;
pub mod pending;
pub mod registry;
pub mod services;
pub mod session;

mod handlers;
#[cfg(test)]
mod testing;

use layers::{crypt::CRYPT_LEN, reverse::REVERSE_LEN};
use strata_types::Id;

/// Relay positions in a circuit.
pub const CIRCUIT_LEN: usize = 5;

/// Hop label of a node's own return session.
pub const RETURN_HOP: u8 = 5;

/// One reply slot: a `Reverse` layer and the `Crypt` that seals the rest.
pub const REVERSE_LAYER_LEN: usize = REVERSE_LEN + CRYPT_LEN;

/// A reply header holds three slots.
pub const REVERSE_HEADER_LEN: usize = 3 * REVERSE_LAYER_LEN;

/// Error types for onion operations.
#[derive(Debug, thiserror::Error)]
pub enum OnionError {
    #[error(transparent)]
    Splice(#[from] strata_types::SpliceError),

    #[error("crypto error: {0}")]
    Crypto(#[from] strata_crypto::CryptoError),

    #[error("transport error: {0}")]
    Transport(#[from] strata_transport::TransportError),

    /// Two layer kinds registered under one magic.
    #[error("duplicate registration for magic {0}")]
    DuplicateMagic(String),

    /// The onion is structurally invalid.
    #[error("invalid onion: {0}")]
    InvalidOnion(String),

    #[error("insufficient relays: need {need}, have {have}")]
    InsufficientRelays { need: usize, have: usize },

    /// No funded session carries the required hop label.
    #[error("no eligible session for hop {0}")]
    NoEligibleHop(u8),

    #[error("hop list has {hops} entries but {sessions} session slots")]
    HopMismatch { hops: usize, sessions: usize },

    #[error("unknown session {0}")]
    UnknownSession(Id),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience result type for onion operations.
pub type Result<T> = std::result::Result<T, OnionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_header_sizes() {
        assert_eq!(REVERSE_LAYER_LEN, 79);
        assert_eq!(REVERSE_HEADER_LEN, 237);
    }

    #[test]
    fn test_error_display() {
        let err = OnionError::InsufficientRelays { need: 5, have: 2 };
        assert_eq!(err.to_string(), "insufficient relays: need 5, have 2");
        assert_eq!(
            OnionError::NoEligibleHop(3).to_string(),
            "no eligible session for hop 3"
        );
    }
}
