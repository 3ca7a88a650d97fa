//! # strata-transport
//!
//! Moves opaque onion buffers between nodes.
//!
//! - **Packets** ([`packet`]): one sealed shard on the wire
//! - **Segments** ([`segment`]): deterministic shard layout for a message
//! - **FEC** ([`fec`]): Reed-Solomon split into packets and loss-tolerant join
//! - **Simulated network** ([`sim`]): in-memory delivery, optionally through
//!   lossy packetised links
//! - **QUIC** ([`quic`]): framed delivery over QUIC/TLS 1.3 streams
//!
//! ## Architecture
//!
//! ```text
//! Engine dispatch loop
//!     |  Transport::send(addr, bytes)         ^  inbound mpsc channel
//!     v                                       |
//! per-peer send workers  ----------------->  accept / reassembly workers
//!     |                                       ^
//!     v                                       |
//! QUIC streams, or packets (split_to_packets -> join_packets)
//! ```
//!
//! Workers never see session or circuit state; they only carry bytes.

use std::net::SocketAddr;

pub mod fec;
pub mod packet;
pub mod quic;
pub mod segment;
pub mod sim;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Malformed or truncated packet bytes.
    #[error(transparent)]
    Splice(#[from] strata_types::SpliceError),

    /// Packet authentication or key handling failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] strata_crypto::CryptoError),

    /// Invalid or malformed packet.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// The packet's cloak does not name any local key.
    #[error("packet not addressed to this node")]
    NotForUs,

    /// Erasure coding failed or too few shards survived.
    #[error("FEC error: {0}")]
    Fec(String),

    /// No route to the given address.
    #[error("unknown peer {0}")]
    UnknownPeer(SocketAddr),

    /// The peer's queue is full; the buffer was not queued.
    #[error("send queue to {0} is full")]
    QueueFull(SocketAddr),

    /// The peer's queue has been closed.
    #[error("send queue to {0} is closed")]
    QueueClosed(SocketAddr),

    /// TLS/certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// QUIC connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// I/O error (socket, stream read/write).
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal error (should not occur in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Outbound side of a transport, as seen by the engine.
///
/// `send` only queues the buffer for a worker and returns immediately, so it
/// is safe to call from inside the dispatch loop.
pub trait Transport: Send + Sync {
    fn send(&self, addr: SocketAddr, data: Vec<u8>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::Fec("3 of 4 shards".to_string());
        assert_eq!(err.to_string(), "FEC error: 3 of 4 shards");

        let addr: SocketAddr = "127.0.0.1:9".parse().expect("addr");
        assert_eq!(
            TransportError::UnknownPeer(addr).to_string(),
            "unknown peer 127.0.0.1:9"
        );
    }

    #[test]
    fn test_splice_error_is_transparent() {
        let err: TransportError = strata_types::SpliceError::InvalidAddress(3).into();
        assert_eq!(err.to_string(), "invalid address length byte 3");
    }
}
