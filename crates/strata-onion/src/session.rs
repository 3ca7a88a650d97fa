//! Nodes and paid sessions.
//!
//! A session is one hop's key pair plus a balance. The relay and the client
//! each hold a copy: the relay installs it when a `Session` layer arrives with
//! a matching payment, the client when the purchase is confirmed.

use std::net::SocketAddr;

use strata_crypto::blake3::{self, contexts};
use strata_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use strata_types::{Amount, Hash, Id, KEY_LEN};

/// Payment preimage for a session's key pair.
///
/// `BLAKE3::derive_key("Strata v1 session-preimage", LE32(32) || header || LE32(32) || payload)`
pub fn preimage_hash(header: &X25519StaticSecret, payload: &X25519StaticSecret) -> Hash {
    let header = header.to_bytes();
    let payload = payload.to_bytes();
    let material = blake3::encode_multi_field(&[&header, &payload]);
    blake3::derive_key(contexts::SESSION_PREIMAGE, &material)
}

/// A hidden service reachable through an introducer key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Intro {
    pub key: X25519PublicKey,
    pub port: u16,
    pub relay_rate: u32,
}

/// A relay as known from configuration and advertisements.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub addr: SocketAddr,
    pub identity: X25519PublicKey,
    /// Ed25519 key the node signs its ads with.
    pub signing: [u8; KEY_LEN],
    /// Price per relayed byte.
    pub relay_rate: u32,
    pub services: Vec<Intro>,
}

impl Node {
    pub fn new(addr: SocketAddr, identity: X25519PublicKey, signing: [u8; KEY_LEN], relay_rate: u32) -> Self {
        Self {
            addr,
            identity,
            signing,
            relay_rate,
            services: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionData {
    /// Also the id of the payment that funded it.
    pub id: Id,
    pub node: Node,
    pub hop: u8,
    pub header: X25519StaticSecret,
    pub payload: X25519StaticSecret,
    pub header_pub: X25519PublicKey,
    pub payload_pub: X25519PublicKey,
    pub relay_rate: u32,
    pub remaining: Amount,
    pub preimage: Hash,
}

impl SessionData {
    /// A session with fresh keys, as a client prepares one for purchase.
    pub fn generate(node: Node, hop: u8, amount: Amount) -> Self {
        let relay_rate = node.relay_rate;
        Self::with_keys(
            Id::random(),
            node,
            hop,
            X25519StaticSecret::random(),
            X25519StaticSecret::random(),
            relay_rate,
            amount,
        )
    }

    pub fn with_keys(
        id: Id,
        node: Node,
        hop: u8,
        header: X25519StaticSecret,
        payload: X25519StaticSecret,
        relay_rate: u32,
        remaining: Amount,
    ) -> Self {
        let preimage = preimage_hash(&header, &payload);
        Self {
            id,
            node,
            hop,
            header_pub: header.public_key(),
            payload_pub: payload.public_key(),
            header,
            payload,
            relay_rate,
            remaining,
            preimage,
        }
    }

    /// Cost of moving `bytes` through this session's hop.
    pub fn cost(&self, bytes: usize) -> Amount {
        Amount::from(self.relay_rate).saturating_mul(bytes as Amount)
    }

    /// An exit hop carries both the request and the reply and is charged
    /// half of the two together.
    pub fn exit_cost(&self, request: usize, reply: usize) -> Amount {
        self.cost(request.saturating_add(reply)) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new(
            "127.0.0.1:4000".parse().expect("addr"),
            X25519StaticSecret::random().public_key(),
            [0; KEY_LEN],
            3,
        )
    }

    #[test]
    fn test_preimage_depends_on_both_keys() {
        let a = X25519StaticSecret::random();
        let b = X25519StaticSecret::random();
        assert_eq!(preimage_hash(&a, &b), preimage_hash(&a, &b));
        assert_ne!(preimage_hash(&a, &b), preimage_hash(&b, &a));
    }

    #[test]
    fn test_generate_caches_public_keys() {
        let s = SessionData::generate(node(), 2, 1_000);
        assert_eq!(s.header_pub, s.header.public_key());
        assert_eq!(s.payload_pub, s.payload.public_key());
        assert_eq!(s.preimage, preimage_hash(&s.header, &s.payload));
        assert_eq!(s.relay_rate, 3);
    }

    #[test]
    fn test_cost_saturates() {
        let mut s = SessionData::generate(node(), 0, 0);
        assert_eq!(s.cost(100), 300);
        assert_eq!(s.exit_cost(100, 1), 151);
        s.relay_rate = u32::MAX;
        assert_eq!(s.cost(usize::MAX), Amount::MAX);
    }
}
